use thiserror::Error;

use crate::listener::Network;

/// Errors returned by [`Registry::add`](crate::registry::Registry::add).
///
/// Neither variant is fatal: the caller keeps whatever registry state it
/// already had and may decide what to do next (log, surface to a user,
/// ignore a duplicate registration attempt from idempotent init code, ...).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `add` was called after [`Registry::seal`](crate::registry::Registry::seal)
    /// (i.e. after `Supervisor::run` took ownership of the registry).
    #[error("supervisor already started; no further servers may be registered")]
    AlreadyStarted,

    /// A binding with the same `(network, address)` is already registered.
    #[error("address conflict: {network} {address} is already registered")]
    AddressConflict { network: Network, address: String },
}

/// Fatal, process-exiting errors from the core supervisor.
///
/// These are the ones spec.md §7 calls out as bubbling out of
/// `Supervisor::run`: bind failures, a malformed inheritance envelope,
/// too few inherited file descriptors, and a worker that crashes inside
/// the startup grace window. Everything else (per-server errors, shutdown
/// timeouts, an unsupported listener at restart time) is logged locally
/// and never reaches this type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to bind {network} listener on {address}: {source}")]
    Bind {
        network: Network,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed inheritance envelope: {0}")]
    Envelope(String),

    #[error(
        "insufficient inherited file descriptors: registry has {needed} binding(s) but only {got} were inherited"
    )]
    InsufficientInheritedFds { needed: usize, got: usize },

    #[error("worker (pid {pid}) exited within the startup threshold: {source}")]
    RestartStartupFailure {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Nix(#[from] nix::Error),
}

/// Errors a `Server` implementation may return from `serve`/`shutdown`.
///
/// These are logged by the worker runtime and never propagate out of
/// `Supervisor::run` (spec.md §7: "ServerError — per-server serve/shutdown
/// errors. Logged, not propagated; do not abort peers.").
#[derive(Debug, Error)]
pub enum ServerError {
    /// Canonical "I was told to stop and did" signal. A server *must*
    /// return this (rather than `Other`) when its listener was closed by
    /// a call to `shutdown`, so the worker runtime can tell a clean drain
    /// apart from an unexpected failure.
    #[error("listener closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, Error>;
