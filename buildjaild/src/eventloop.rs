//! Owns the demultiplexer: accepts new clients, reads client bytes, fires
//! the scheduler on a one-second tick, reaps the running child, and
//! drives the execution queue after every batch of events.
//!
//! `nix::poll` only gives readiness over file descriptors, so the
//! listener and client sockets are polled directly while SIGCHLD and
//! SIGHUP are delivered as `AtomicBool` flags via `signal_hook` and
//! checked once per poll iteration. The one-second schedule tick rides
//! the poll timeout itself rather than a separate timer fd.

use std::os::fd::AsFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::child::{self, ChildRunner, RunningJob};
use crate::config::ConfigCache;
use crate::options::{Options, DEFAULT_SOCKET_PATH};
use crate::queue::Queue;
use crate::router::{self, RouterOutcome};
use crate::scheduler;
use crate::session::ClientSession;

const POLL_TIMEOUT_MS: u16 = 1000;

/// The single-threaded dispatch loop. Holds the session table, the
/// execution queue, the running slot, and the config cache.
pub struct EventLoop {
    listener: UnixListener,
    socket_path: PathBuf,
    sessions: Vec<ClientSession>,
    queue: Queue,
    running: Option<RunningJob>,
    runner: ChildRunner,
    config: ConfigCache,
    shutdown: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    child_exited: Arc<AtomicBool>,
    last_tick: Instant,
    has_schedule: bool,
}

impl EventLoop {
    /// Binds the listening socket named by the policy (falling back to
    /// the compiled-in default) and wires the shutdown/reload/child-exit
    /// signal flags. The schedule tick only runs if the loaded policy
    /// declares a `schedule` section.
    pub fn new(options: &Options, config: ConfigCache) -> Result<Self> {
        let socket_path = config
            .current()
            .socket_path()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH));
        let listener = bind_listener(&socket_path)?;
        listener
            .set_nonblocking(true)
            .context("setting control socket non-blocking")?;
        let has_schedule = config.current().schedule_entries().is_some();

        let shutdown = Arc::new(AtomicBool::new(false));
        let reload_requested = Arc::new(AtomicBool::new(false));
        let child_exited = Arc::new(AtomicBool::new(false));
        for sig in [
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
            signal_hook::consts::SIGQUIT,
        ] {
            signal_hook::flag::register(sig, Arc::clone(&shutdown))
                .context("registering shutdown signal handler")?;
        }
        signal_hook::flag::register(signal_hook::consts::SIGHUP, Arc::clone(&reload_requested))
            .context("registering SIGHUP handler")?;
        signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&child_exited))
            .context("registering SIGCHLD handler")?;
        unsafe {
            nix::sys::signal::signal(
                nix::sys::signal::Signal::SIGPIPE,
                nix::sys::signal::SigHandler::SigIgn,
            )
        }
        .context("ignoring SIGPIPE")?;

        Ok(Self {
            listener,
            socket_path,
            sessions: Vec::new(),
            queue: Queue::new(),
            running: None,
            runner: ChildRunner::new(options),
            config,
            shutdown,
            reload_requested,
            child_exited,
            last_tick: Instant::now(),
            has_schedule,
        })
    }

    /// Runs until a `quit` operation or a termination signal is observed,
    /// then unlinks the socket and returns.
    pub fn run(&mut self) -> Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.run_one_iteration()?;
        }
        self.shutdown_cleanup();
        Ok(())
    }

    fn run_one_iteration(&mut self) -> Result<()> {
        if self.reload_requested.swap(false, Ordering::Relaxed) {
            match self.config.reload() {
                Ok(()) => log::info!("policy reloaded"),
                Err(err) => {
                    log::warn!("policy reload failed, keeping previous policy: {err}")
                }
            }
        }

        let mut poll_fds = Vec::with_capacity(self.sessions.len() + 1);
        poll_fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
        for session in &self.sessions {
            poll_fds.push(PollFd::new(session.stream.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut poll_fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(err) => return Err(anyhow!("poll failed: {err}")),
        }

        let listener_ready = poll_fds[0]
            .revents()
            .unwrap_or(PollFlags::empty())
            .contains(PollFlags::POLLIN);

        let mut ready: Vec<(usize, PollFlags)> = Vec::new();
        for (idx, pfd) in poll_fds.iter().enumerate().skip(1) {
            let revents = pfd.revents().unwrap_or(PollFlags::empty());
            if !revents.is_empty() {
                ready.push((idx - 1, revents));
            }
        }
        drop(poll_fds);

        if listener_ready {
            self.accept_one();
        }

        // Highest index first: removing a session shifts everything after
        // it, so processing back-to-front keeps the remaining indices valid.
        for (idx, revents) in ready.into_iter().rev() {
            self.service_session(idx, revents);
        }

        if self.child_exited.swap(false, Ordering::Relaxed) {
            self.reap_child();
        }

        if self.has_schedule && self.last_tick.elapsed() >= Duration::from_secs(1) {
            self.last_tick = Instant::now();
            let policy = self.config.current();
            scheduler::tick(&policy, &mut self.queue);
        }

        self.process_queue();
        Ok(())
    }

    fn accept_one(&mut self) {
        match self.listener.accept() {
            Ok((stream, _addr)) => match ClientSession::accept(stream) {
                Ok(session) => self.sessions.push(session),
                Err(err) => log::warn!("failed to accept client: {err}"),
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(err) => log::warn!("accept failed: {err}"),
        }
    }

    fn service_session(&mut self, idx: usize, revents: PollFlags) {
        let hangup =
            revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL);
        let mut drop_session = false;
        let mut shutdown_requested = false;

        match self.sessions[idx].read_available() {
            Ok(eof) => {
                while let Some(request) = self.sessions[idx].take_frame() {
                    let client = self.sessions[idx].client;
                    let running_entry = self.running.as_ref().map(|job| &job.entry);
                    let outcome =
                        router::handle(&request, client, &self.config, &mut self.queue, running_entry);
                    match outcome {
                        RouterOutcome::Reply(reply) => {
                            if let Err(err) = self.sessions[idx].send(&reply) {
                                log::debug!("failed to reply to client: {err}");
                                drop_session = true;
                            }
                        }
                        RouterOutcome::NoReply => {}
                        RouterOutcome::Shutdown => shutdown_requested = true,
                    }
                }
                if eof {
                    drop_session = true;
                }
            }
            Err(err) => {
                log::debug!("client read error, dropping session: {err}");
                drop_session = true;
            }
        }

        if hangup {
            drop_session = true;
        }
        if drop_session {
            // Dropping the session's `UnixStream` closes its descriptor
            // exactly once.
            self.sessions.remove(idx);
        }
        if shutdown_requested {
            self.shutdown.store(true, Ordering::Relaxed);
        }
    }

    /// Checks the single running slot against the SIGCHLD flag. Uses
    /// `Child::try_wait` rather than raw `waitpid` so `std::process`'s own
    /// bookkeeping for this child stays consistent.
    fn reap_child(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        match running.child.try_wait() {
            Ok(Some(status)) => {
                match child::classify(status) {
                    child::ExitClass::Normal(code) => {
                        log::info!("build tool exited with code {code}")
                    }
                    child::ExitClass::Signaled(signal) => {
                        log::info!("build tool killed by signal {signal}")
                    }
                    child::ExitClass::Other => log::info!("build tool terminated abnormally"),
                }
                self.running = None;
            }
            Ok(None) => {}
            Err(err) => log::warn!("failed to reap build tool child: {err}"),
        }
    }

    /// After every event batch: if no job is running and the queue is
    /// non-empty, pop the front entry into the running slot.
    fn process_queue(&mut self) {
        if self.running.is_some() {
            return;
        }
        let Some(entry) = self.queue.pop_front() else {
            return;
        };
        self.running = self.runner.start(entry);
    }

    fn shutdown_cleanup(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
        log::info!("buildjaild shutting down");
    }
}

/// Binds the control socket at `path`, mode 0666, unlinking any stale
/// socket left from a previous run first.
fn bind_listener(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating socket directory {}", parent.display()))?;
        }
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
        .with_context(|| format!("setting permissions on {}", path.display()))?;
    Ok(listener)
}
