//! Worker runtime (spec.md §4.5): drives one process generation's
//! `ServerBinding`s from listener acquisition through serving to a
//! bounded-time graceful drain.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal as NixSignal};
use nix::unistd::{getppid, Pid};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command_bus::{CommandBus, CommandError, CommandKind, CommandReceiver, CommandSender};
use crate::registry::ServerBinding;
use crate::server::ShutdownContext;

/// Where a worker generation currently sits in its lifecycle (spec.md
/// §3 `WorkerState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Serving,
    Draining,
    Stopped,
}

/// Runs every registered server to completion, reacting to SIGHUP (an
/// externally requested restart, forwarded from the Master) and to
/// commands placed on its [`CommandBus`] (spec.md §4.4).
pub struct WorkerRuntime {
    bindings: Vec<ServerBinding>,
    shutdown_grace: Duration,
    state: Arc<std::sync::Mutex<WorkerState>>,
    command_tx: CommandSender,
    command_rx: Option<CommandReceiver>,
}

impl WorkerRuntime {
    pub fn new(bindings: Vec<ServerBinding>, shutdown_grace: Duration) -> Self {
        let (command_tx, command_rx) = CommandBus::channel();
        Self::with_bus(bindings, shutdown_grace, command_tx, command_rx)
    }

    /// Like [`Self::new`], but with a caller-supplied command bus rather
    /// than a fresh one — lets a command source built before acquisition
    /// (e.g. a control-endpoint `Server` registered alongside the others)
    /// share the exact sender this runtime's controller loop drains.
    pub fn with_bus(
        bindings: Vec<ServerBinding>,
        shutdown_grace: Duration,
        command_tx: CommandSender,
        command_rx: CommandReceiver,
    ) -> Self {
        Self {
            bindings,
            shutdown_grace,
            state: Arc::new(std::sync::Mutex::new(WorkerState::Serving)),
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// A cloneable handle callers outside the runtime (a control endpoint,
    /// a future CLI) can use to place commands on the bus.
    pub fn command_sender(&self) -> CommandSender {
        self.command_tx.clone()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().expect("worker state mutex poisoned")
    }

    /// Runs this generation to completion: spawns one `serve` task per
    /// binding, then waits for either a fatal serve failure, the single
    /// worker-quit signal (SIGHUP — spec.md §4.4), or a bus command, and
    /// drains every binding with a shared deadline before returning.
    ///
    /// SIGHUP is the worker's only installed signal: the Master forwards
    /// it both for a restart request and for its own master-quit (SIGINT)
    /// path, so the worker never needs a second handler to tell the two
    /// apart (spec.md §9's "implement this by installing different
    /// handlers in the two roles", not two handlers in the same role).
    pub async fn run(mut self) {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(%err, "failed to install SIGHUP handler; restart-on-signal is unavailable");
                return self.serve_until_drained_by_bus().await;
            }
        };

        let mut command_rx = self.command_rx.take().expect("command_rx taken twice");
        let serve_tasks = self.spawn_serve_tasks();

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!("received SIGHUP; delegating restart to supervisor");
                    self.delegate_restart_to_supervisor();
                    self.drain(serve_tasks).await;
                    return;
                }
                maybe_command = command_rx.recv() => {
                    match maybe_command {
                        Some(command) => {
                            match command.kind {
                                CommandKind::Shutdown => {
                                    info!("shutdown command received");
                                    self.drain(serve_tasks).await;
                                    command.reply(Ok(()));
                                    return;
                                }
                                CommandKind::Restart => {
                                    info!("restart command received");
                                    let result = self.delegate_restart_to_supervisor();
                                    command.reply(result);
                                    if result.is_ok() {
                                        self.drain(serve_tasks).await;
                                        return;
                                    }
                                }
                            }
                        }
                        None => {
                            // All senders dropped; nothing left to drive this
                            // worker externally. Keep serving.
                        }
                    }
                }
            }
        }
    }

    async fn serve_until_drained_by_bus(mut self) {
        let mut command_rx = self.command_rx.take().expect("command_rx taken twice");
        let serve_tasks = self.spawn_serve_tasks();
        while let Some(command) = command_rx.recv().await {
            if command.kind == CommandKind::Shutdown {
                self.drain(serve_tasks).await;
                command.reply(Ok(()));
                return;
            }
            command.reply(Err(CommandError::NoSupervisor));
        }
    }

    fn spawn_serve_tasks(&mut self) -> Vec<JoinHandle<()>> {
        self.bindings
            .iter()
            .map(|binding| {
                let server = binding.server.clone();
                let listener = binding
                    .listener
                    .take()
                    .expect("listener acquisition must populate every binding before serving");
                let network = binding.network;
                let address = binding.address.clone();
                tokio::spawn(async move {
                    match server.serve(listener).await {
                        Ok(()) => info!(%network, %address, "server exited cleanly"),
                        Err(crate::error::ServerError::Closed) => {
                            info!(%network, %address, "server drained")
                        }
                        Err(err) => {
                            warn!(%network, %address, %err, "server exited with an unexpected error")
                        }
                    }
                })
            })
            .collect()
    }

    /// Sends SIGHUP to the parent process so the Master's already-ordered
    /// restart path spawns and readies a successor before this generation
    /// is told to drain (spec.md §4.7). If this process has been
    /// reparented to init (no live Master), this is a no-op.
    fn delegate_restart_to_supervisor(&self) -> Result<(), CommandError> {
        let parent = getppid();
        if parent.as_raw() == 1 {
            warn!("no supervising parent; restart request has nowhere to go");
            return Err(CommandError::NoSupervisor);
        }
        if let Err(err) = kill(Pid::from_raw(parent.as_raw()), NixSignal::SIGHUP) {
            error!(%err, pid = %parent, "failed to signal supervisor for restart");
            return Err(CommandError::NoSupervisor);
        }
        Ok(())
    }

    async fn drain(&mut self, serve_tasks: Vec<JoinHandle<()>>) {
        *self.state.lock().expect("worker state mutex poisoned") = WorkerState::Draining;
        let ctx = ShutdownContext::with_timeout(self.shutdown_grace);

        // One task per binding (spec.md §4.4 step 3b / §5) sharing the same
        // absolute deadline, so a slow or hung server's shutdown can't eat
        // into the time budget the others get — a sequential loop recomputing
        // `ctx.remaining()` per iteration would let an earlier binding starve
        // later ones of their share of the grace period.
        let shutdowns: Vec<_> = self
            .bindings
            .iter()
            .map(|binding| {
                let server = binding.server.clone();
                let network = binding.network;
                let address = binding.address.clone();
                tokio::spawn(async move {
                    match tokio::time::timeout_at(ctx.deadline(), server.shutdown(ctx)).await {
                        Ok(Ok(())) => info!(%network, %address, "drained within grace period"),
                        Ok(Err(err)) => warn!(%network, %address, %err, "shutdown returned an error"),
                        Err(_) => warn!(%network, %address, "shutdown exceeded grace period; abandoning"),
                    }
                })
            })
            .collect();

        for shutdown in shutdowns {
            let _ = shutdown.await;
        }

        for task in serve_tasks {
            task.abort();
        }

        *self.state.lock().expect("worker state mutex poisoned") = WorkerState::Stopped;
    }
}

/// Whether SIGHUP was received as a genuine, worker-initiated restart
/// request versus some other cause of process exit. Set by the Master's
/// own signal-forwarding path (spec.md §4.5 step 2d), never by the
/// worker — a worker that exits(0) after draining looks identical at the
/// OS level to a crash unless the Master records provenance itself
/// before forwarding the signal. Kept here because it travels with the
/// worker's lifetime from the Master's point of view.
pub type RestartProvenance = Arc<AtomicBool>;

pub fn new_restart_provenance() -> RestartProvenance {
    Arc::new(AtomicBool::new(false))
}
