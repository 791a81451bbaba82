//! End-to-end demo: a zero-downtime echo service with a TCP and a Unix
//! listener, both restart-safe. Exercise it with:
//!
//! ```text
//! $ target/debug/zerodown-demo &
//! $ kill -HUP <pid>   # graceful restart, no dropped connections
//! $ kill -INT <pid>   # graceful shutdown
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::{Result, WrapErr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use zerodown::{Listener, Network, Server, ServerError, ShutdownContext, Supervisor};

struct EchoServer {
    closing: Arc<AtomicBool>,
}

impl EchoServer {
    fn new() -> Self {
        Self {
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn accept_loop_tcp(&self, listener: tokio::net::TcpListener) -> std::result::Result<(), ServerError> {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return Err(ServerError::Closed);
            }
            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
            };
            tokio::spawn(async move {
                if let Err(err) = echo(stream).await {
                    warn!(%err, %peer, "connection ended with an error");
                }
            });
        }
    }

    async fn accept_loop_unix(&self, listener: tokio::net::UnixListener) -> std::result::Result<(), ServerError> {
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return Err(ServerError::Closed);
            }
            let stream = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(err) => {
                        warn!(%err, "accept failed");
                        continue;
                    }
                },
                _ = tokio::time::sleep(Duration::from_millis(200)) => continue,
            };
            tokio::spawn(async move {
                if let Err(err) = echo(stream).await {
                    warn!(%err, "connection ended with an error");
                }
            });
        }
    }
}

async fn echo<S: AsyncReadExt + AsyncWriteExt + Unpin>(mut stream: S) -> std::io::Result<()> {
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..n]).await?;
    }
}

#[async_trait]
impl Server for EchoServer {
    async fn serve(&self, listener: Listener) -> std::result::Result<(), ServerError> {
        match listener {
            Listener::Tcp(l) => self.accept_loop_tcp(l).await,
            Listener::Unix(l) => self.accept_loop_unix(l).await,
            Listener::InMemory => Err(ServerError::Closed),
        }
    }

    async fn shutdown(&self, _ctx: ShutdownContext) -> std::result::Result<(), ServerError> {
        self.closing.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt().with_env_filter("zerodown=info").init();

    // Test hook only: lets the crash-loop-guard integration test simulate a
    // worker generation that dies immediately after inheriting its fds,
    // without touching the Master's own startup path.
    if std::env::var_os("ZERODOWN_DEMO_CRASH_ON_INHERIT").is_some() {
        let argv0 = std::env::args().next().unwrap_or_default();
        let base = std::path::Path::new(&argv0)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(argv0);
        let keys = zerodown::EnvelopeKeys::for_exe(&base);
        if std::env::var(&keys.graceful).as_deref() == Ok("true") {
            eprintln!("zerodown-demo: simulating a worker crash on inherit");
            std::process::exit(7);
        }
    }

    let tcp_port = std::env::var("ZERODOWN_DEMO_TCP_PORT").unwrap_or_else(|_| "7070".to_string());
    let unix_path = std::env::var("ZERODOWN_DEMO_UNIX_PATH")
        .unwrap_or_else(|_| "/tmp/zerodown-echo-demo.sock".to_string());

    let supervisor = Supervisor::new();
    supervisor
        .add_server(
            Network::Tcp,
            format!("127.0.0.1:{tcp_port}"),
            Arc::new(EchoServer::new()),
        )
        .wrap_err("registering tcp echo server")?;
    supervisor
        .add_server(Network::Unix, unix_path, Arc::new(EchoServer::new()))
        .wrap_err("registering unix echo server")?;

    info!("starting zero-downtime echo demo");
    supervisor
        .run(zerodown::RunConfig::default())
        .await
        .wrap_err("supervisor exited")?;

    Ok(())
}
