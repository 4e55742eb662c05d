//! Spawns the external build tool for the queue entry at the front of the
//! line, redirecting its stdio to a per-job log file, and classifies its
//! exit status when the event loop reaps it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

use buildjail_protocol::node::{Node, NodeExt};

use crate::options::Options;

/// The currently executing job: at most one exists at any time. Owns its
/// log descriptor, so dropping this struct closes it exactly once,
/// whether the job finished normally or the daemon is tearing down.
pub struct RunningJob {
    pub entry: Node,
    pub child: Child,
    _log_file: File,
}

/// How a finished child's exit status should be reported.
pub enum ExitClass {
    Normal(i32),
    Signaled(i32),
    Other,
}

pub fn classify(status: ExitStatus) -> ExitClass {
    if let Some(code) = status.code() {
        ExitClass::Normal(code)
    } else if let Some(signal) = status.signal() {
        ExitClass::Signaled(signal)
    } else {
        ExitClass::Other
    }
}

/// Builds child processes for queue entries, using the configured build
/// tool binary and a fallback log path when an entry doesn't name one.
pub struct ChildRunner {
    build_tool_path: std::path::PathBuf,
    build_tool_argv0: String,
    fallback_log_path: std::path::PathBuf,
}

impl ChildRunner {
    pub fn new(options: &Options) -> Self {
        Self {
            build_tool_path: options.build_tool_path.clone(),
            build_tool_argv0: options.build_tool_argv0.clone(),
            fallback_log_path: options.fallback_log_path.clone(),
        }
    }

    /// Spawns the build tool for `entry`. Returns `None` on spawn failure
    /// (already logged) or when the entry is missing a `command` field; in
    /// both cases the running slot stays empty so the queue advances on
    /// the next loop iteration.
    pub fn start(&self, entry: Node) -> Option<RunningJob> {
        let Some(command) = entry.field("command").and_then(|v| v.text()) else {
            log::warn!("queue entry missing a command field, dropping it");
            return None;
        };
        let command = command.to_string();
        let arguments = entry
            .field("arguments")
            .and_then(|v| v.text())
            .unwrap_or("")
            .to_string();
        let requested_log = entry
            .field("log")
            .and_then(|v| v.text())
            .map(|s| s.to_string());

        let log_file = resolve_log_file(requested_log.as_deref(), &self.fallback_log_path);
        let stdout_fd = match log_file.try_clone() {
            Ok(f) => f,
            Err(err) => {
                log::error!("failed to duplicate log descriptor for stdout: {err}");
                return None;
            }
        };
        let stderr_fd = match log_file.try_clone() {
            Ok(f) => f,
            Err(err) => {
                log::error!("failed to duplicate log descriptor for stderr: {err}");
                return None;
            }
        };

        let mut cmd = Command::new(&self.build_tool_path);
        cmd.arg0(&self.build_tool_argv0);
        cmd.arg(&command);
        for token in arguments.split_ascii_whitespace() {
            cmd.arg(token);
        }
        cmd.stdout(Stdio::from(stdout_fd));
        cmd.stderr(Stdio::from(stderr_fd));
        cmd.stdin(Stdio::null());

        match cmd.spawn() {
            Ok(child) => Some(RunningJob {
                entry,
                child,
                _log_file: log_file,
            }),
            Err(err) => {
                log::error!("cannot run {}: {err}", self.build_tool_path.display());
                None
            }
        }
    }
}

/// Opens (creating parent directories with mode 0777 if needed) the log
/// file an entry requested, truncating it; falls back to `fallback_path`
/// and finally to `/dev/null` if every attempt to open a real file fails.
fn resolve_log_file(requested: Option<&str>, fallback_path: &Path) -> File {
    if let Some(path) = requested {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o777)
                    .create(parent)
                {
                    log::warn!("failed to create log directory {}: {err}", parent.display());
                }
            }
        }
        match open_truncated(path) {
            Ok(f) => return f,
            Err(err) => log::warn!("failed to open log {path}: {err}, falling back"),
        }
    }
    match open_truncated(fallback_path.to_string_lossy().as_ref()) {
        Ok(f) => f,
        Err(err) => {
            log::warn!(
                "failed to open fallback log {}: {err}, using /dev/null",
                fallback_path.display()
            );
            OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .expect("opening /dev/null should never fail")
        }
    }
}

fn open_truncated(path: &str) -> std::io::Result<File> {
    use std::os::unix::fs::PermissionsExt;
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_rejects_entry_without_command() {
        let options = Options {
            build_tool_path: "/bin/true".into(),
            ..Default::default()
        };
        let runner = ChildRunner::new(&options);
        assert!(runner.start(json!({"arguments": "-j4"})).is_none());
    }

    #[test]
    fn start_runs_configured_build_tool_and_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("job.log");
        let options = Options {
            build_tool_path: "/bin/echo".into(),
            build_tool_argv0: "echo".into(),
            fallback_log_path: dir.path().join("fallback.log"),
            ..Default::default()
        };
        let runner = ChildRunner::new(&options);
        let entry = json!({
            "command": "hello",
            "arguments": "",
            "log": log_path.to_string_lossy(),
        });
        let mut job = runner.start(entry).expect("spawn should succeed");
        let status = job.child.wait().unwrap();
        assert!(status.success());
        let contents = std::fs::read_to_string(&log_path).unwrap();
        assert!(contents.contains("hello"));
    }

    #[test]
    fn classify_distinguishes_exit_codes_from_signals() {
        let status = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 7")
            .status()
            .unwrap();
        assert!(matches!(classify(status), ExitClass::Normal(7)));
    }
}
