//! Platform "jails" enumeration hook.
//!
//! Listing the build tool's jails is a platform integration this core
//! does not have, so this always returns an empty list and the `jail`
//! operation replies with `{"jail": []}`.

use buildjail_protocol::node::Node;

pub fn list_jails() -> Vec<Node> {
    Vec::new()
}
