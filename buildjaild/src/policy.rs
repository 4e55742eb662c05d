//! Authorization decisions over the policy tree: operation-level,
//! command-level, and per-argument escalation. All three predicates share
//! one exact-then-wildcard rule search (`find_rule`) and one grant check
//! (`grants`), parameterized by section, instead of repeating the same
//! tree-search recursion at every tier.

use buildjail_protocol::identity::{matches, IdKind};
use buildjail_protocol::node::{Node, NodeExt};

use crate::config::Policy;

/// The authenticated peer a request is being authorized against. Captured
/// once at accept time by the event loop and never refreshed.
#[derive(Clone, Copy, Debug)]
pub struct Client {
    pub uid: u32,
    pub gid: u32,
}

/// Finds the credential object for `subject` within `section`: an exact
/// key match wins; a `"*"` key seen along the way is the fallback. Returns
/// `None` if neither exists.
fn find_rule<'a>(section: &'a [Node], subject: &str) -> Option<&'a Node> {
    let mut wildcard: Option<&Node> = None;
    for entry in section {
        let Some(obj) = entry.as_object() else { continue };
        if let Some(cred) = obj.get(subject) {
            return Some(cred);
        }
        if wildcard.is_none() {
            wildcard = obj.get("*");
        }
    }
    wildcard
}

/// A match on any principal in either the rule's `group` or `user` list
/// grants access; `group` is checked first, matching the reference
/// ordering.
fn grants(cred: &Node, client: &Client) -> bool {
    let group_ok = cred
        .field("group")
        .and_then(|list| list.items())
        .is_some_and(|list| list.iter().any(|p| matches(p, client.gid, IdKind::Group)));
    if group_ok {
        return true;
    }
    cred.field("user")
        .and_then(|list| list.items())
        .is_some_and(|list| list.iter().any(|p| matches(p, client.uid, IdKind::User)))
}

/// `is_operation_allowed(op_name, client)`: walks the `operation` section.
/// Absence of the section, or absence of both an exact and wildcard rule,
/// denies.
pub fn is_operation_allowed(policy: &Policy, op_name: &str, client: &Client) -> bool {
    let Some(section) = policy.operation_rules() else { return false };
    find_rule(section, op_name).is_some_and(|cred| grants(cred, client))
}

/// `is_command_allowed(command_name, client)`: same structure over the
/// `command` section, but always returns the matched rule (exact or
/// wildcard) alongside the verdict so the router can attempt an
/// argument-level escalation even on denial.
pub fn is_command_allowed<'a>(
    policy: &'a Policy,
    command_name: &str,
    client: &Client,
) -> (bool, Option<&'a Node>) {
    let Some(section) = policy.command_rules() else { return (false, None) };
    match find_rule(section, command_name) {
        Some(cred) => (grants(cred, client), Some(cred)),
        None => (false, None),
    }
}

/// `is_arguments_allowed(argument_string, matched_command_rule, client)`:
/// tokenizes on ASCII whitespace, keeps only tokens starting with `-`, and
/// requires every one of them to be individually authorized against the
/// matched command rule's nested `argument` section. An argument string
/// with no flags is vacuously allowed.
pub fn is_arguments_allowed(argument_string: &str, matched_command_rule: &Node, client: &Client) -> bool {
    let flags: Vec<&str> = argument_string
        .split_ascii_whitespace()
        .filter(|tok| tok.starts_with('-'))
        .collect();
    if flags.is_empty() {
        return true;
    }
    let Some(argument_section) = matched_command_rule
        .field("argument")
        .and_then(|v| v.items())
    else {
        return false;
    };
    flags
        .iter()
        .all(|flag| find_rule(argument_section, flag).is_some_and(|cred| grants(cred, client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy_from(value: serde_json::Value) -> Policy {
        Policy::from_node(value)
    }

    const ROOT: Client = Client { uid: 0, gid: 0 };
    const NONROOT: Client = Client { uid: 1001, gid: 1001 };

    #[test]
    fn scenario_operation_status_wildcard_user_grants_anyone() {
        let policy = policy_from(json!({"operation": [{"status": {"user": ["*"]}}]}));
        assert!(is_operation_allowed(&policy, "status", &NONROOT));
    }

    #[test]
    fn scenario_command_allowed_for_wildcard_user() {
        let policy = policy_from(json!({"command": [{"bulk": {"user": ["*"]}}]}));
        let (allowed, rule) = is_command_allowed(&policy, "bulk", &NONROOT);
        assert!(allowed);
        assert!(rule.is_some());
    }

    #[test]
    fn scenario_permission_denied_on_root_only_user_list() {
        let policy = policy_from(json!({"command": [{"bulk": {"user": ["root"]}}]}));
        let (allowed, rule) = is_command_allowed(&policy, "bulk", &NONROOT);
        assert!(!allowed);
        assert!(rule.is_some(), "the rule still matched, just denied");
    }

    #[test]
    fn scenario_argument_escalation_single_flag_allowed() {
        let policy = policy_from(json!({
            "command": [{"bulk": {
                "argument": [
                    {"-j": {"user": ["*"]}},
                    {"*": {"user": ["root"]}}
                ]
            }}]
        }));
        let (_, rule) = is_command_allowed(&policy, "bulk", &NONROOT);
        let rule = rule.unwrap();
        assert!(is_arguments_allowed("-j 12amd64", rule, &NONROOT));
    }

    #[test]
    fn scenario_argument_escalation_extra_flag_falls_to_wildcard_and_denies() {
        let policy = policy_from(json!({
            "command": [{"bulk": {
                "argument": [
                    {"-j": {"user": ["*"]}},
                    {"*": {"user": ["root"]}}
                ]
            }}]
        }));
        let (_, rule) = is_command_allowed(&policy, "bulk", &NONROOT);
        let rule = rule.unwrap();
        assert!(!is_arguments_allowed("-j 12amd64 -C", rule, &NONROOT));
        assert!(is_arguments_allowed("-j 12amd64 -C", rule, &ROOT));
    }

    #[test]
    fn arguments_allowed_vacuously_true_with_no_flags() {
        let policy = policy_from(json!({"command": [{"bulk": {}}]}));
        let (_, rule) = is_command_allowed(&policy, "bulk", &NONROOT);
        let rule = rule.unwrap();
        assert!(is_arguments_allowed("not-a-flag another", rule, &NONROOT));
    }

    #[test]
    fn missing_section_denies_everything() {
        let policy = policy_from(json!({}));
        assert!(!is_operation_allowed(&policy, "status", &ROOT));
        let (allowed, rule) = is_command_allowed(&policy, "bulk", &ROOT);
        assert!(!allowed);
        assert!(rule.is_none());
    }

    #[test]
    fn exact_match_wins_over_wildcard() {
        let policy = policy_from(json!({
            "operation": [
                {"*": {"user": ["root"]}},
                {"status": {"user": ["*"]}}
            ]
        }));
        assert!(is_operation_allowed(&policy, "status", &NONROOT));
        assert!(!is_operation_allowed(&policy, "reload", &NONROOT));
        assert!(is_operation_allowed(&policy, "reload", &ROOT));
    }
}
