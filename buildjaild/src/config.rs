//! Policy tree loading and the atomic-reload cache around it. The policy
//! file is a JSON document parsed into the same `Node` tree used for
//! requests and replies.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use buildjail_protocol::node::{Node, NodeExt};

/// The parsed, immutable policy tree. Reload replaces the whole tree; no
/// request ever observes a partially-swapped one.
#[derive(Debug, Clone)]
pub struct Policy {
    root: Node,
}

impl Policy {
    /// Parses a policy tree from a file on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {}", path.display()))?;
        let root: Node = serde_json::from_str(&text)
            .with_context(|| format!("parsing configuration file {}", path.display()))?;
        Ok(Self { root })
    }

    /// Builds a `Policy` directly from an in-memory tree; used by tests.
    #[cfg(test)]
    pub fn from_node(root: Node) -> Self {
        Self { root }
    }

    pub fn operation_rules(&self) -> Option<&Vec<Node>> {
        self.root.field("operation").and_then(|v| v.items())
    }

    pub fn command_rules(&self) -> Option<&Vec<Node>> {
        self.root.field("command").and_then(|v| v.items())
    }

    pub fn schedule_entries(&self) -> Option<&Vec<Node>> {
        self.root.field("schedule").and_then(|v| v.items())
    }

    pub fn socket_path(&self) -> Option<&str> {
        self.root.field("socket").and_then(|v| v.text())
    }

    pub fn pidfile_path(&self) -> Option<&str> {
        self.root.field("pidfile").and_then(|v| v.text())
    }
}

/// Holds the currently active `Policy` behind a single owning `Arc`, swapped
/// under a `Mutex` on reload. Because request handling is single-threaded,
/// no reader ever observes a torn swap; the `Mutex` only serializes the
/// swap itself against a concurrent `current()` clone.
pub struct ConfigCache {
    path: PathBuf,
    current: Mutex<Arc<Policy>>,
}

impl ConfigCache {
    /// Loads the policy at `path` for the first time. Failure here is
    /// fatal at startup (the caller should propagate it out of `main`).
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let policy = Policy::load(&path)?;
        Ok(Self {
            path,
            current: Mutex::new(Arc::new(policy)),
        })
    }

    /// Returns a cheap clone of the currently active policy.
    pub fn current(&self) -> Arc<Policy> {
        self.current
            .lock()
            .expect("config cache mutex poisoned")
            .clone()
    }

    /// Re-parses the policy file and swaps it in atomically. On failure the
    /// previously active policy is left untouched and the error is
    /// returned for the caller to log or report. A reload failure is
    /// never fatal.
    pub fn reload(&self) -> Result<()> {
        let policy = Policy::load(&self.path)?;
        *self.current.lock().expect("config cache mutex poisoned") = Arc::new(policy);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_temp_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn policy_exposes_typed_sections() {
        let policy = Policy::from_node(json!({
            "socket": "/var/run/buildjaild.sock",
            "operation": [{"status": {"user": ["*"]}}],
        }));
        assert_eq!(policy.socket_path(), Some("/var/run/buildjaild.sock"));
        assert_eq!(policy.operation_rules().unwrap().len(), 1);
        assert!(policy.command_rules().is_none());
    }

    #[test]
    fn reload_swaps_atomically_and_keeps_old_on_failure() {
        let file = write_temp_config(r#"{"operation":[{"reload":{"user":["root"]}}]}"#);
        let cache = ConfigCache::load(file.path()).unwrap();
        assert!(cache.current().operation_rules().is_some());

        // Corrupt the file; reload must fail but leave the old policy live.
        std::fs::write(file.path(), "not json").unwrap();
        assert!(cache.reload().is_err());
        assert!(cache.current().operation_rules().is_some());

        // Now write a valid replacement and reload should pick it up.
        std::fs::write(file.path(), r#"{"operation":[{"reload":{"user":["*"]}}]}"#).unwrap();
        cache.reload().unwrap();
        let rules = cache.current().operation_rules().unwrap().clone();
        let cred = rules[0].field("reload").unwrap();
        assert_eq!(cred.field("user").unwrap()[0], json!("*"));
    }
}
