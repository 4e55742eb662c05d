use std::path::PathBuf;

use anyhow::{bail, Context, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/usr/local/etc/buildjaild.conf";
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/buildjaild.sock";
pub const DEFAULT_PIDFILE_PATH: &str = "/var/run/buildjaild.pid";
pub const DEFAULT_BUILD_TOOL_PATH: &str = "/usr/local/bin/buildtool";
pub const DEFAULT_FALLBACK_LOG_PATH: &str = "/tmp/buildjaild.log";

/// Resolved daemon configuration derived from CLI flags. Everything else
/// (socket path, pidfile path, ACLs, schedule) lives in the policy file at
/// `config_path` and is read by `ConfigCache`.
#[derive(Clone, Debug)]
pub struct Options {
    pub config_path: PathBuf,
    pub build_tool_path: PathBuf,
    pub build_tool_argv0: String,
    pub fallback_log_path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            build_tool_path: PathBuf::from(DEFAULT_BUILD_TOOL_PATH),
            build_tool_argv0: "buildtool".to_string(),
            fallback_log_path: PathBuf::from(DEFAULT_FALLBACK_LOG_PATH),
        }
    }
}

/// Parses command-line arguments into `Options`, applying defaults for
/// anything not passed.
pub fn parse_args(argv: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = argv.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                options.config_path =
                    PathBuf::from(iter.next().context("--config requires a path")?);
            }
            "--build-tool" => {
                options.build_tool_path =
                    PathBuf::from(iter.next().context("--build-tool requires a path")?);
            }
            "--build-tool-argv0" => {
                options.build_tool_argv0 = iter
                    .next()
                    .context("--build-tool-argv0 requires a value")?
                    .clone();
            }
            "--log" => {
                options.fallback_log_path =
                    PathBuf::from(iter.next().context("--log requires a path")?);
            }
            "--help" => {
                print_usage(&argv[0]);
                std::process::exit(0);
            }
            other => bail!("unknown argument {other}"),
        }
    }
    Ok(options)
}

fn print_usage(prog: &str) {
    eprintln!(
        "Usage: {prog} [--config PATH] [--build-tool PATH] [--build-tool-argv0 NAME] [--log PATH]"
    );
}
