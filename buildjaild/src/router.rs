//! Given a parsed request and an authenticated client, dispatches to an
//! operation handler or enqueues a command.
//!
//! `handle` takes everything it needs as plain arguments (an in-memory
//! request tree, a `Client`, the config cache, and the queue) rather than
//! owning the event loop's sockets, so it can be unit-tested directly.

use buildjail_protocol::node::{Node, NodeExt};
use serde_json::json;

use crate::config::ConfigCache;
use crate::jail;
use crate::policy::{self, Client};
use crate::ports;
use crate::queue::Queue;

/// What the event loop should do once a request has been routed.
pub enum RouterOutcome {
    /// Send this framed reply back to the requesting client.
    Reply(Node),
    /// No reply is sent: either the request was an accepted command
    /// enqueue (clients learn of progress via subsequent status queries)
    /// or the operation name was not recognized.
    NoReply,
    /// The `quit` operation was authorized. The event loop unlinks the
    /// socket and terminates; no reply is sent for it either.
    Shutdown,
}

fn error_reply(message: &str) -> RouterOutcome {
    RouterOutcome::Reply(json!({"type": "error", "message": message}))
}

/// Operation-level denials.
fn operation_denied() -> RouterOutcome {
    error_reply("permission denied")
}

/// Command-level and argument-level denials.
fn command_denied() -> RouterOutcome {
    error_reply("Permission denied")
}

/// Routes one parsed request. Does not spawn anything itself: an accepted
/// command is appended to `queue`; the event loop drains it into the
/// `ChildRunner` after the event batch.
pub fn handle(
    request: &Node,
    client: Client,
    config: &ConfigCache,
    queue: &mut Queue,
    running_entry: Option<&Node>,
) -> RouterOutcome {
    let Some(data) = request.field("data") else {
        return error_reply("malformed request: missing data");
    };

    if let Some(op_name) = data.field("operation").and_then(|v| v.text()) {
        return handle_operation(op_name, client, config, queue, running_entry);
    }

    let Some(command_name) = data.field("command").and_then(|v| v.text()) else {
        return error_reply("malformed request: missing command");
    };

    let policy = config.current();
    let (mut allowed, matched_rule) = policy::is_command_allowed(&policy, command_name, &client);
    if !allowed {
        if let (Some(rule), Some(arguments_field)) = (matched_rule, data.field("arguments")) {
            let Some(arguments) = arguments_field.text() else {
                return error_reply("malformed request: arguments must be a string");
            };
            allowed = policy::is_arguments_allowed(arguments, rule, &client);
        }
    }
    if !allowed {
        return command_denied();
    }

    queue.append(data.clone());
    log::info!("new command queued");
    RouterOutcome::NoReply
}

fn handle_operation(
    op_name: &str,
    client: Client,
    config: &ConfigCache,
    queue: &mut Queue,
    running_entry: Option<&Node>,
) -> RouterOutcome {
    let policy = config.current();
    if !policy::is_operation_allowed(&policy, op_name, &client) {
        return operation_denied();
    }
    match op_name {
        "quit" => RouterOutcome::Shutdown,
        "reload" => match config.reload() {
            Ok(()) => RouterOutcome::Reply(json!({"reload": true})),
            Err(err) => {
                log::warn!("policy reload failed, keeping previous policy: {err}");
                RouterOutcome::Reply(json!({"reload": false}))
            }
        },
        "queue" => RouterOutcome::Reply(Node::Array(queue.snapshot())),
        "status" => {
            let (state, data) = match running_entry {
                Some(entry) => ("running", entry.clone()),
                None => ("idle", json!({})),
            };
            RouterOutcome::Reply(json!({"state": state, "data": data}))
        }
        "jail" => RouterOutcome::Reply(json!({"jail": jail::list_jails()})),
        "ports" => RouterOutcome::Reply(json!({"ports": ports::list_ports()})),
        _ => RouterOutcome::NoReply,
    }
}
