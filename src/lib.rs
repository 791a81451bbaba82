//! Zero-downtime restart supervisor: a master/worker process pair that
//! hands listening sockets across `exec` so a new binary generation can
//! take over without ever closing a socket peers are connected to.
//!
//! Applications register one or more [`Server`] implementations against
//! network addresses with a [`Supervisor`], then call [`Supervisor::run`]
//! exactly once. `run` figures out from the process environment whether
//! this is a cold start or a graceful successor and dispatches to the
//! appropriate role — it never returns during normal operation except on
//! a fatal [`Error`] or a final, intentional shutdown.

pub mod acquisition;
pub mod command_bus;
pub mod environment;
pub mod error;
pub mod inheritance;
pub mod listener;
pub mod master;
pub mod registry;
pub mod server;
pub mod worker;

#[cfg(feature = "control-endpoint")]
pub mod control;

use std::time::Duration;

use tracing::info;

pub use command_bus::{Command, CommandBus, CommandError, CommandKind, CommandResult, CommandSender};
pub use environment::Environment;
pub use error::{Error, RegistryError, Result, ServerError};
pub use inheritance::{EnvelopeKeys, ProcessGeneration};
pub use listener::{Listener, Network, UnsupportedListenerType};
pub use master::{Master, MasterConfig, MasterState};
pub use registry::Registry;
pub use server::{Server, ShutdownContext};
pub use worker::{WorkerRuntime, WorkerState};

/// Tunables for a single call to [`Supervisor::run`] (spec.md §3
/// `D_start` / `D_shutdown`).
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// How long a freshly spawned worker must stay alive before its exit
    /// is treated as a startup crash rather than routine churn. Only
    /// consulted on the Master side.
    pub startup_threshold: Duration,
    /// The bound given to every `Server::shutdown` call during a drain.
    /// Only consulted on the Worker side.
    pub shutdown_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            startup_threshold: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// The entry point applications build against: register servers, then
/// hand the sealed set to either role.
pub struct Supervisor {
    registry: Registry,
    commands: (CommandSender, Option<command_bus::CommandReceiver>),
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = CommandBus::channel();
        Self {
            registry: Registry::new(),
            commands: (tx, Some(rx)),
        }
    }

    /// Registers a server under `(network, address)` (spec.md §4.2).
    pub fn add_server(
        &self,
        network: Network,
        address: impl Into<String>,
        server: std::sync::Arc<dyn Server>,
    ) -> std::result::Result<(), RegistryError> {
        self.registry.add(network, address, server)
    }

    /// A sender into the command bus this supervisor's worker generation
    /// will eventually drain — hand clones of this to any command source
    /// registered alongside the servers themselves, e.g. a
    /// `control-endpoint` `ControlServer`.
    pub fn command_sender(&self) -> CommandSender {
        self.commands.0.clone()
    }

    /// Seals the registry, determines this process's generation from the
    /// environment, acquires every listener, and dispatches to the
    /// Master role (cold start) or the Worker role (graceful successor).
    ///
    /// On the Master side this call does not return during normal
    /// operation: it supervises an indefinite chain of worker
    /// generations. On the Worker side it returns once this generation
    /// has fully drained.
    pub async fn run(self, config: RunConfig) -> Result<()> {
        let generation = ProcessGeneration::from_env()?;
        let bindings = self.registry.seal_and_take();
        let bindings = acquisition::acquire(bindings, &generation).await?;

        if generation.is_graceful() {
            info!(bindings = bindings.len(), "running as worker");
            let command_rx = self
                .commands
                .1
                .expect("Supervisor::run consumes the command receiver at most once");
            let runtime = WorkerRuntime::with_bus(bindings, config.shutdown_grace, self.commands.0, command_rx);
            runtime.run().await;
            Ok(())
        } else {
            info!(bindings = bindings.len(), "running as master");
            let argv0 = std::env::args().next().unwrap_or_default();
            let base = std::path::Path::new(&argv0)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(argv0);
            let keys = EnvelopeKeys::for_exe(&base);
            let mut master = Master::new(
                keys,
                MasterConfig {
                    startup_threshold: config.startup_threshold,
                },
            );
            master.supervise(&bindings).await
        }
    }
}
