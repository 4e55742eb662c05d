use std::io::{self, Write};

use anyhow::{Context, Result};

use buildjaild::config::ConfigCache;
use buildjaild::eventloop::EventLoop;
use buildjaild::options::{self, DEFAULT_PIDFILE_PATH};
use buildjaild::pidfile::PidFile;

fn main() {
    if let Err(err) = real_main() {
        let _ = writeln!(io::stderr(), "buildjaild: {err:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    env_logger::init();

    let argv: Vec<String> = std::env::args().collect();
    let opts = options::parse_args(&argv)?;

    let config = ConfigCache::load(&opts.config_path)
        .with_context(|| format!("loading policy file {}", opts.config_path.display()))?;

    let pidfile_path = config
        .current()
        .pidfile_path()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from(DEFAULT_PIDFILE_PATH));
    let _pidfile = PidFile::create(&pidfile_path)?;

    let mut event_loop = EventLoop::new(&opts, config)?;
    log::info!("buildjaild listening, pid {}", std::process::id());
    event_loop.run()
}
