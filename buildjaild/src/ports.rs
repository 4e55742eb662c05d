//! Platform "ports" enumeration hook, the counterpart to `jail.rs`.
//!
//! This core has no platform integration to ask, so the `ports`
//! operation always replies with an empty object.

use buildjail_protocol::node::Node;
use serde_json::json;

pub fn list_ports() -> Node {
    json!({})
}
