//! Master supervisor (spec.md §4.5): the long-lived process that binds
//! (or inherits) listeners, spawns a worker generation, and re-spawns a
//! successor on restart or unexpected crash.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::inheritance::{self, EnvelopeKeys, ProcessGeneration};
use crate::registry::ServerBinding;

/// Where the Master sits in its own lifecycle (spec.md §3 `MasterState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Spawning,
    Supervising,
    Exiting,
}

/// How long a freshly spawned worker must stay alive before its exit is
/// treated as a crash worth giving up on, rather than routine churn
/// (spec.md §3 `D_start`).
#[derive(Debug, Clone, Copy)]
pub struct MasterConfig {
    pub startup_threshold: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            startup_threshold: Duration::from_secs(1),
        }
    }
}

/// Drives the Master side of the restart protocol for a single cold
/// boot: binds every registered listener once, then supervises an
/// indefinite chain of worker generations, handing each successor the
/// same fds the first generation bound.
///
/// SIGKILL is deliberately never installed here (spec.md §9): a Master
/// that can't be asked to drain has nothing useful left to do with a
/// handler anyway, and leaving it unhandled preserves the OS default.
pub struct Master {
    keys: EnvelopeKeys,
    config: MasterConfig,
    state: MasterState,
    restart_requested: Arc<AtomicBool>,
}

impl Master {
    pub fn new(keys: EnvelopeKeys, config: MasterConfig) -> Self {
        Self {
            keys,
            config,
            state: MasterState::Spawning,
            restart_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Runs the supervision loop forever (or until a fatal error).
    /// `fds` is the full set of listening-socket fds that belong to the
    /// current set of bindings, in registry order — the Master itself
    /// never serves them, it only hands them to each worker generation.
    pub async fn supervise(&mut self, bindings: &[ServerBinding]) -> Result<()> {
        let fds: Vec<_> = bindings
            .iter()
            .map(|b| {
                b.listener
                    .as_ref()
                    .expect("bindings passed to Master::supervise must already be acquired")
                    .try_as_raw_fd()
            })
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| {
                Error::Envelope("a registered binding has no inheritable file descriptor".into())
            })?;

        let mut hangup = signal(SignalKind::hangup())
            .map_err(Error::Io)?;
        let mut interrupt = signal(SignalKind::interrupt())
            .map_err(Error::Io)?;

        self.state = MasterState::Spawning;
        let mut current = inheritance::spawn_successor(&self.keys, &fds).map_err(Error::Io)?;
        let mut current_since = Instant::now();
        self.state = MasterState::Supervising;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("received SIGHUP; spawning successor before draining current worker");
                    self.state = MasterState::Spawning;
                    match inheritance::spawn_successor(&self.keys, &fds) {
                        Ok(successor) => {
                            // The successor is spawned (and its `exec` has
                            // already replaced the forked image, which
                            // begins accepting on the inherited fds
                            // immediately) before the current generation is
                            // ever told to drain — both hold the same
                            // listening sockets concurrently during this
                            // handoff, satisfying spec.md §5's ordering
                            // guarantee and I-no-bind-gap.
                            self.restart_requested.store(true, Ordering::SeqCst);
                            if let Some(pid) = current.pid() {
                                let _ = nix::sys::signal::kill(
                                    nix::unistd::Pid::from_raw(pid),
                                    nix::sys::signal::Signal::SIGHUP,
                                );
                            }
                            let _ = current.child.wait().await;
                            current = successor;
                            current_since = Instant::now();
                            self.restart_requested.store(false, Ordering::SeqCst);
                            self.state = MasterState::Supervising;
                        }
                        Err(err) => {
                            error!(%err, "failed to spawn successor; keeping current worker");
                            self.state = MasterState::Supervising;
                        }
                    }
                }
                _ = interrupt.recv() => {
                    info!("received SIGINT; forwarding worker-quit to current worker and exiting");
                    self.state = MasterState::Exiting;
                    if let Some(pid) = current.pid() {
                        let _ = nix::sys::signal::kill(
                            nix::unistd::Pid::from_raw(pid),
                            nix::sys::signal::Signal::SIGHUP,
                        );
                    }
                    let _ = current.child.wait().await;
                    return Ok(());
                }
                status = current.child.wait() => {
                    let elapsed = current_since.elapsed();
                    let was_requested = self.restart_requested.swap(false, Ordering::SeqCst);
                    match status {
                        Ok(status) if status.success() || was_requested => {
                            info!(?status, requested = was_requested, "worker exited; spawning successor");
                        }
                        Ok(status) => {
                            warn!(?status, ?elapsed, "worker exited unexpectedly");
                            if elapsed < self.config.startup_threshold {
                                self.state = MasterState::Exiting;
                                return Err(Error::RestartStartupFailure {
                                    pid: current.pid().unwrap_or(-1),
                                    source: std::io::Error::new(
                                        std::io::ErrorKind::Other,
                                        format!("worker exited with {status:?} within the startup threshold"),
                                    ),
                                });
                            }
                        }
                        Err(err) => {
                            error!(%err, "failed to wait for worker");
                        }
                    }
                    self.state = MasterState::Spawning;
                    current = inheritance::spawn_successor(&self.keys, &fds).map_err(Error::Io)?;
                    current_since = Instant::now();
                    self.state = MasterState::Supervising;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_startup_threshold_is_one_second() {
        let config = MasterConfig::default();
        assert_eq!(config.startup_threshold, Duration::from_secs(1));
    }

    #[test]
    fn new_master_starts_in_spawning_state() {
        let master = Master::new(EnvelopeKeys::for_exe("zerodown-test"), MasterConfig::default());
        assert_eq!(master.state(), MasterState::Spawning);
    }
}
