//! The `Server` capability (spec.md §6): the interface a pluggable server
//! implementation must provide for the core to drive it. Concrete
//! servers — an HTTP server being the reference implementation — are
//! external collaborators; this module only defines the seam.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::ServerError;
use crate::listener::Listener;

/// A deadline-bearing context passed to `Server::shutdown`, the Rust
/// equivalent of spec.md §6's "`ctx_with_deadline`".
#[derive(Debug, Clone, Copy)]
pub struct ShutdownContext {
    deadline: Instant,
}

impl ShutdownContext {
    pub fn with_timeout(grace: Duration) -> Self {
        Self {
            deadline: Instant::now() + grace,
        }
    }

    /// Time remaining until the deadline, or `Duration::ZERO` if it has
    /// already passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// A pluggable network server: anything that can run to completion over a
/// listener and be asked to stop within a deadline.
///
/// Implementations must return [`ServerError::Closed`] from `serve` when
/// they stop because `shutdown` was called (spec.md §6: "must return a
/// canonical closed-listener indicator (distinguishable from other
/// errors) when drained normally") — any other `Err` is treated as an
/// unexpected failure and only logged, never used to decide worker
/// lifecycle.
#[async_trait]
pub trait Server: Send + Sync {
    /// Runs until the listener is closed or `shutdown` is called.
    async fn serve(&self, listener: Listener) -> std::result::Result<(), ServerError>;

    /// Stops accepting and waits for in-flight requests up to the
    /// deadline carried by `ctx`.
    async fn shutdown(&self, ctx: ShutdownContext) -> std::result::Result<(), ServerError>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// A `Server` that never accepts anything and shuts down instantly.
    /// Useful wherever a test only cares about registry/plumbing behavior
    /// and not about actually serving connections.
    pub struct NoopServer;

    #[async_trait]
    impl Server for NoopServer {
        async fn serve(&self, _listener: Listener) -> std::result::Result<(), ServerError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        async fn shutdown(&self, _ctx: ShutdownContext) -> std::result::Result<(), ServerError> {
            Ok(())
        }
    }

    /// A server whose `shutdown` blocks for a fixed duration, for
    /// exercising `D_shutdown` timeout behavior (spec.md scenario 6).
    pub struct SlowShutdownServer {
        pub shutdown_delay: Duration,
        pub shut_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Server for SlowShutdownServer {
        async fn serve(&self, _listener: Listener) -> std::result::Result<(), ServerError> {
            while !self.shut_down.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(ServerError::Closed)
        }

        async fn shutdown(&self, _ctx: ShutdownContext) -> std::result::Result<(), ServerError> {
            tokio::time::sleep(self.shutdown_delay).await;
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
