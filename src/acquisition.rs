//! Listener acquisition (spec.md §4.3): turns sealed registry bindings
//! into live listeners, either by binding cold or by reconstructing them
//! from inherited file descriptors — insertion order is the wire
//! contract that ties each binding to its fd.

use std::os::unix::io::RawFd;

use tracing::warn;

use crate::error::{Error, Result};
use crate::inheritance::ProcessGeneration;
use crate::listener;
use crate::registry::ServerBinding;

/// Populates `listener` on each binding, in place, consuming `bindings`
/// and handing back the same list with listeners attached.
///
/// Cold start (`generation.is_graceful() == false`): every binding binds
/// a fresh listener via `listener::bind`.
///
/// Graceful start: binding `i` is reconstructed from
/// `generation.inherited_fds()[i]`. If fewer FDs were inherited than
/// there are bindings, this is `Error::InsufficientInheritedFds` — a
/// fatal startup failure, since a worker can't serve bindings it wasn't
/// handed a socket for. A surplus of inherited FDs is tolerated: the
/// extras are logged and dropped (spec.md §9).
pub async fn acquire(
    mut bindings: Vec<ServerBinding>,
    generation: &ProcessGeneration,
) -> Result<Vec<ServerBinding>> {
    if !generation.is_graceful() {
        for binding in &mut bindings {
            binding.listener = Some(listener::bind(binding.network, &binding.address).await?);
        }
        return Ok(bindings);
    }

    let inherited: &[RawFd] = generation.inherited_fds();
    if inherited.len() < bindings.len() {
        return Err(Error::InsufficientInheritedFds {
            needed: bindings.len(),
            got: inherited.len(),
        });
    }
    if inherited.len() > bindings.len() {
        warn!(
            inherited = inherited.len(),
            registered = bindings.len(),
            "more file descriptors were inherited than registered bindings; surplus discarded"
        );
    }

    for (binding, &fd) in bindings.iter_mut().zip(inherited) {
        // SAFETY: `fd` came from the parent's envelope, one per binding in
        // registration order; it is not owned anywhere else in this
        // process and is a valid, listening socket of `binding.network`'s
        // family by the wire contract spec.md §3-I3 establishes.
        let acquired = unsafe { listener::from_raw_fd(binding.network, fd)? };
        binding.listener = Some(acquired);
    }

    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Network;
    use crate::registry::Registry;
    use crate::server::tests::NoopServer;
    use std::sync::Arc;

    #[tokio::test]
    async fn cold_start_binds_every_registered_address() {
        let registry = Registry::new();
        registry
            .add(Network::Tcp, "127.0.0.1:0", Arc::new(NoopServer))
            .unwrap();
        registry
            .add(Network::Tcp, "127.0.0.1:0", Arc::new(NoopServer))
            .unwrap_err(); // duplicate string address is rejected regardless of port 0

        let bindings = registry.seal_and_take();
        let generation = ProcessGeneration::from_env().unwrap();
        let acquired = acquire(bindings, &generation).await.unwrap();
        assert_eq!(acquired.len(), 1);
        assert!(acquired[0].listener.is_some());
    }

    #[tokio::test]
    async fn graceful_start_with_too_few_fds_is_fatal() {
        let registry = Registry::new();
        registry
            .add(Network::Tcp, "127.0.0.1:0", Arc::new(NoopServer))
            .unwrap();
        registry
            .add(Network::Unix, "/tmp/zerodown-acquisition-test.sock", Arc::new(NoopServer))
            .unwrap();
        let bindings = registry.seal_and_take();

        let generation = ProcessGeneration::synthetic(true, vec![3]);
        let err = acquire(bindings, &generation).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientInheritedFds { needed: 2, got: 1 }
        ));
    }
}
