//! The two-variant `Network` enum and the `Listener` type it binds to,
//! plus the FD projection/reconstruction that make graceful restart
//! possible (spec.md §4.6).

use std::fmt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

use tokio::net::{TcpListener, UnixListener};
use tracing::debug;

use crate::error::{Error, Result};

/// The transport a `ServerBinding` listens on. Spec.md's data model
/// restricts this to exactly two kinds; it is a closed enum rather than a
/// bare string so that `Registry::add` and the wire-format envelope can't
/// drift out of sync with what `Listener` actually knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Tcp,
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Tcp => "tcp",
            Network::Unix => "unix",
        })
    }
}

/// A bound, accepting listener.
///
/// `Tcp` and `Unix` are the only variants spec.md's data model allows a
/// `ServerBinding` to carry after acquisition. `InMemory` is not
/// reachable through normal cold-start binding or FD inheritance; it
/// exists only so that tests (and a host embedding a non-socket "server",
/// e.g. an in-process test double) can construct the
/// `UnsupportedListenerType` scenario spec.md §4.6/§8 describes without
/// needing a second, parallel `Network` variant that would never
/// otherwise occur.
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
    InMemory,
}

impl Listener {
    pub fn network(&self) -> Option<Network> {
        match self {
            Listener::Tcp(_) => Some(Network::Tcp),
            Listener::Unix(_) => Some(Network::Unix),
            Listener::InMemory => None,
        }
    }

    /// Projects this listener to the raw OS file descriptor that should be
    /// inherited by a successor (spec.md §4.6). Returns
    /// `Error::Io(ErrorKind::Unsupported)`-shaped error for anything that
    /// isn't backed by a real socket.
    ///
    /// This reads the *existing* fd; it does not duplicate or otherwise
    /// disturb the live listener — the duplication needed to survive
    /// `exec` happens later, inside the child's `pre_exec` hook, via
    /// `dup2` onto the fd's post-fork copy (see `inheritance::spawn_successor`).
    pub fn try_as_raw_fd(&self) -> std::result::Result<RawFd, UnsupportedListenerType> {
        match self {
            Listener::Tcp(l) => Ok(l.as_raw_fd()),
            Listener::Unix(l) => Ok(l.as_raw_fd()),
            Listener::InMemory => Err(UnsupportedListenerType),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Listener::Tcp(l) => f.debug_tuple("Tcp").field(&l.local_addr().ok()).finish(),
            Listener::Unix(_) => f.debug_tuple("Unix").finish(),
            Listener::InMemory => f.write_str("InMemory"),
        }
    }
}

/// Marker error: a listener variant with no underlying OS file descriptor
/// was asked to participate in a restart. Spec.md §4.6: "any other
/// listener variant yields `UnsupportedListenerType` and aborts the
/// restart attempt (the worker continues serving)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported listener type")]
pub struct UnsupportedListenerType;

/// Binds a fresh listener for a cold-start binding.
pub async fn bind(network: Network, address: &str) -> Result<Listener> {
    match network {
        Network::Tcp => {
            let listener =
                TcpListener::bind(address)
                    .await
                    .map_err(|source| Error::Bind {
                        network,
                        address: address.to_string(),
                        source,
                    })?;
            debug!(%network, %address, "bound listener");
            Ok(Listener::Tcp(listener))
        }
        Network::Unix => {
            // Remove a stale socket file left behind by a predecessor that
            // didn't clean up (e.g. a previous cold start that crashed
            // before ever reaching a graceful exit). A live graceful
            // restart never reaches this path: successors always acquire
            // Unix listeners via inheritance, never by rebinding the path.
            if std::fs::metadata(address).is_ok() {
                let _ = std::fs::remove_file(address);
            }
            let listener =
                UnixListener::bind(address).map_err(|source| Error::Bind {
                    network,
                    address: address.to_string(),
                    source,
                })?;
            debug!(%network, %address, "bound listener");
            Ok(Listener::Unix(listener))
        }
    }
}

/// Reconstructs a listener of the given `network` from an inherited raw
/// file descriptor (spec.md §4.3's graceful-start path). `fd` must be a
/// valid, open, already-`listen()`ing socket of the matching family —
/// true by construction, since the registry's binding order is the wire
/// contract (spec.md §3-I3) that tells us which `network` each inherited
/// fd belongs to.
///
/// # Safety
/// `fd` must be a valid, open file descriptor not owned elsewhere; this
/// function takes ownership of it.
pub unsafe fn from_raw_fd(network: Network, fd: RawFd) -> Result<Listener> {
    match network {
        Network::Tcp => {
            let std_listener = std::net::TcpListener::from_raw_fd(fd);
            std_listener.set_nonblocking(true)?;
            Ok(Listener::Tcp(TcpListener::from_std(std_listener)?))
        }
        Network::Unix => {
            let std_listener = std::os::unix::net::UnixListener::from_raw_fd(fd);
            std_listener.set_nonblocking(true)?;
            Ok(Listener::Unix(UnixListener::from_std(std_listener)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cold_bind_removes_a_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zerodown-listener-test.sock");

        // Simulate a predecessor that bound the path and never cleaned up.
        let stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let listener = bind(Network::Unix, path.to_str().unwrap()).await.unwrap();
        assert_eq!(listener.network(), Some(Network::Unix));
    }

    #[tokio::test]
    async fn cold_bind_tcp_yields_a_tcp_listener() {
        let listener = bind(Network::Tcp, "127.0.0.1:0").await.unwrap();
        assert_eq!(listener.network(), Some(Network::Tcp));
        assert!(listener.try_as_raw_fd().is_ok());
    }

    #[test]
    fn in_memory_listener_is_unsupported_for_fd_projection() {
        let listener = Listener::InMemory;
        assert_eq!(listener.network(), None);
        assert_eq!(listener.try_as_raw_fd(), Err(UnsupportedListenerType));
    }
}
