//! Demo wiring the HTTP control endpoint (feature = "control-endpoint")
//! alongside a reference echo server:
//!
//! ```text
//! $ target/debug/zerodown-control-demo &
//! $ curl -s localhost:7071/restart   # {"ok":true}
//! $ curl -s localhost:7071/shutdown  # {"ok":true}
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use color_eyre::eyre::{Result, WrapErr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use zerodown::control::ControlServer;
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
}

#[async_trait]
impl Server for EchoServer {
    async fn serve(&self, listener: Listener) -> std::result::Result<(), ServerError> {
        let Listener::Tcp(listener) = listener else {
            return Err(ServerError::Closed);
        };
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return Err(ServerError::Closed);
            }
            let (mut stream, _) = tokio::select! {
                accepted = listener.accept() => accepted.map_err(|e| ServerError::Other(Box::new(e)))?,
                _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => continue,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
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

    let supervisor = Supervisor::new();
    supervisor
        .add_server(Network::Tcp, "127.0.0.1:7070", Arc::new(EchoServer::new()))
        .wrap_err("registering echo server")?;
    supervisor
        .add_server(
            Network::Tcp,
            "127.0.0.1:7071",
            Arc::new(ControlServer::new(supervisor.command_sender())),
        )
        .wrap_err("registering control server")?;

    info!("starting zero-downtime control-endpoint demo");
    supervisor
        .run(zerodown::RunConfig::default())
        .await
        .wrap_err("supervisor exited")?;

    Ok(())
}
