//! Resolves a policy principal descriptor against a peer's numeric uid/gid.
//!
//! A descriptor is either the wildcard `"*"`, a name to resolve through the
//! system user/group database, or a literal numeric id. No failure mode is
//! surfaced upward: a name that doesn't resolve simply fails to match.

use crate::node::Node;
use nix::unistd::{Group, User};

/// Which system database a string principal should be resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    User,
    Group,
}

/// Returns whether `descriptor` matches `peer_id`, resolving names through
/// the system database appropriate to `kind`.
pub fn matches(descriptor: &Node, peer_id: u32, kind: IdKind) -> bool {
    match descriptor {
        Node::String(s) if s == "*" => true,
        Node::String(name) => resolve_name(name, kind) == Some(peer_id),
        Node::Number(n) => n.as_u64().map(|v| v as u32) == Some(peer_id),
        _ => false,
    }
}

fn resolve_name(name: &str, kind: IdKind) -> Option<u32> {
    match kind {
        IdKind::User => User::from_name(name).ok().flatten().map(|u| u.uid.as_raw()),
        IdKind::Group => Group::from_name(name)
            .ok()
            .flatten()
            .map(|g| g.gid.as_raw()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_always_matches() {
        assert!(matches(&json!("*"), 0, IdKind::User));
        assert!(matches(&json!("*"), 12345, IdKind::Group));
    }

    #[test]
    fn numeric_descriptor_matches_exact_id_only() {
        assert!(matches(&json!(1001), 1001, IdKind::User));
        assert!(!matches(&json!(1001), 1002, IdKind::User));
    }

    #[test]
    fn unresolvable_name_does_not_match() {
        assert!(!matches(
            &json!("no-such-user-xyz123"),
            0,
            IdKind::User
        ));
    }

    #[test]
    fn unsupported_descriptor_shapes_never_match() {
        assert!(!matches(&json!(null), 0, IdKind::User));
        assert!(!matches(&json!([1, 2]), 0, IdKind::User));
        assert!(!matches(&json!(true), 0, IdKind::User));
    }

    #[test]
    fn root_name_resolves_to_uid_zero() {
        // "root" is uid 0 on every POSIX system this daemon targets.
        assert!(matches(&json!("root"), 0, IdKind::User));
        assert!(!matches(&json!("root"), 1, IdKind::User));
    }
}
