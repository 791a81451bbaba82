//! The server registry (spec.md §4.2): a process-wide, insertion-ordered
//! collection of `(network, address, server)` bindings, sealed once
//! serving begins.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::error::RegistryError;
use crate::listener::{Listener, Network};
use crate::server::Server;

/// One registered `(network, address, server)` triple. Before acquisition
/// `listener` is `None`; listener acquisition (spec.md §4.3) populates it
/// exactly once, either by binding (cold start) or by reconstructing it
/// from an inherited file descriptor (graceful start).
pub struct ServerBinding {
    pub network: Network,
    pub address: String,
    pub server: Arc<dyn Server>,
    pub listener: Option<Listener>,
}

impl ServerBinding {
    fn new(network: Network, address: String, server: Arc<dyn Server>) -> Self {
        Self {
            network,
            address,
            server,
            listener: None,
        }
    }
}

struct Inner {
    bindings: Vec<(Network, String, Arc<dyn Server>)>,
    sealed: bool,
}

/// An ordered, seal-once collection of server bindings.
///
/// Per spec.md §9's design note, this is a single object constructed once
/// by the application (not module-level mutable state); an application
/// that wants global convenience accessors can wrap one instance in its
/// own `OnceLock`, but the core never reaches for a global by itself.
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                bindings: Vec::new(),
                sealed: false,
            }),
        }
    }

    /// Registers a server under `(network, address)`.
    ///
    /// Invariants (spec.md §3): unique on `(network, address)` (I1);
    /// rejects after sealing (I2); insertion order becomes the FD wire
    /// contract (I3) once acquisition runs.
    pub fn add(
        &self,
        network: Network,
        address: impl Into<String>,
        server: Arc<dyn Server>,
    ) -> std::result::Result<(), RegistryError> {
        let address = address.into();
        let mut inner = self.inner.lock().expect("registry mutex poisoned");

        if inner.sealed {
            return Err(RegistryError::AlreadyStarted);
        }

        if inner
            .bindings
            .iter()
            .any(|(n, a, _)| *n == network && *a == address)
        {
            return Err(RegistryError::AddressConflict { network, address });
        }

        info!(%network, %address, "registered server binding");
        inner.bindings.push((network, address, server));
        Ok(())
    }

    /// Seals the registry. Idempotent (spec.md R-seal).
    pub fn seal(&self) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().expect("registry mutex poisoned").sealed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seals the registry (if not already sealed) and hands back its
    /// bindings in registration order, each with an empty `listener` slot
    /// ready for acquisition (spec.md §4.3).
    pub(crate) fn seal_and_take(&self) -> Vec<ServerBinding> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        inner.sealed = true;
        inner
            .bindings
            .drain(..)
            .map(|(network, address, server)| ServerBinding::new(network, address, server))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::NoopServer;

    fn noop() -> Arc<dyn Server> {
        Arc::new(NoopServer)
    }

    #[test]
    fn add_rejects_duplicate_address_regardless_of_server_identity() {
        let registry = Registry::new();
        assert!(registry.add(Network::Tcp, ":9001", noop()).is_ok());
        let err = registry.add(Network::Tcp, ":9001", noop()).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AddressConflict {
                network: Network::Tcp,
                address: ":9001".to_string()
            }
        );
    }

    #[test]
    fn different_network_same_address_is_not_a_conflict() {
        let registry = Registry::new();
        assert!(registry.add(Network::Tcp, "/tmp/x", noop()).is_ok());
        assert!(registry.add(Network::Unix, "/tmp/x", noop()).is_ok());
    }

    #[test]
    fn add_after_seal_is_rejected() {
        let registry = Registry::new();
        registry.seal();
        registry.seal(); // idempotent, R-seal
        let err = registry.add(Network::Tcp, ":9001", noop()).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyStarted);
    }

    #[test]
    fn seal_and_take_preserves_insertion_order() {
        let registry = Registry::new();
        registry.add(Network::Tcp, ":9001", noop()).unwrap();
        registry.add(Network::Unix, "/tmp/a.sock", noop()).unwrap();
        registry.add(Network::Tcp, ":9002", noop()).unwrap();

        let bindings = registry.seal_and_take();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].address, ":9001");
        assert_eq!(bindings[1].address, "/tmp/a.sock");
        assert_eq!(bindings[2].address, ":9002");
        assert!(registry.is_sealed());
        assert!(registry.is_empty());
    }

    #[test]
    fn zero_bindings_is_a_valid_registry() {
        let registry = Registry::new();
        let bindings = registry.seal_and_take();
        assert!(bindings.is_empty());
    }
}
