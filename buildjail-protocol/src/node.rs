//! The dynamic tagged-variant tree shared by policy files, requests, and
//! replies. `serde_json::Value` already is exactly this shape (`Null`,
//! `Bool`, `Number`, `String`, `Array`, `Object`), so `Node` is an alias
//! rather than a hand-rolled reimplementation; `NodeExt` adds the typed
//! accessors call sites actually need.

use serde_json::Value;

pub type Node = Value;

/// Convenience accessors used throughout the policy engine and router so
/// call sites never match on `serde_json::Value` variants directly.
pub trait NodeExt {
    /// Looks up `key` if this node is an object; `None` otherwise.
    fn field(&self, key: &str) -> Option<&Node>;
    /// The node's array elements, if it is an array.
    fn items(&self) -> Option<&Vec<Node>>;
    /// The node's string value, if it is a string.
    fn text(&self) -> Option<&str>;
    /// The node's integer value, accepting any JSON number that fits a u32
    /// (uids/gids are never negative).
    fn as_id(&self) -> Option<u32>;
}

impl NodeExt for Node {
    fn field(&self, key: &str) -> Option<&Node> {
        self.as_object()?.get(key)
    }

    fn items(&self) -> Option<&Vec<Node>> {
        self.as_array()
    }

    fn text(&self) -> Option<&str> {
        self.as_str()
    }

    fn as_id(&self) -> Option<u32> {
        self.as_u64().and_then(|v| u32::try_from(v).ok())
    }
}
