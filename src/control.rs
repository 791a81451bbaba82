//! Optional control-endpoint adapter (feature = "control-endpoint"),
//! grounded in the original implementation's `control.go`: an HTTP
//! server exposing `/shutdown` and `/restart`, wired to the
//! [`CommandBus`](crate::command_bus::CommandBus) like any other command
//! source, registered and driven as an ordinary [`Server`] binding.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::{IntoResponse, Json};
use axum::routing::any;
use axum::Router;
use serde::Serialize;
use tracing::error;

use crate::command_bus::{CommandKind, CommandSender};
use crate::error::ServerError;
use crate::listener::Listener;
use crate::server::{Server, ShutdownContext};

/// The `{"ok": bool, "err": string?}` response shape the original
/// control server returns.
#[derive(Debug, Serialize)]
struct CommandResponse {
    #[serde(skip_serializing_if = "is_false")]
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    err: Option<String>,
}

fn is_false(ok: &bool) -> bool {
    !*ok
}

impl CommandResponse {
    fn ok() -> Self {
        Self { ok: true, err: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            err: Some(message.into()),
        }
    }
}

impl IntoResponse for CommandResponse {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// A `Server` that serves an HTTP control plane over whatever listener
/// it's registered against, posting `/shutdown` and `/restart` onto a
/// [`CommandSender`] shared with the worker it controls.
///
/// Register this alongside your other bindings to expose it on its own
/// dedicated address — it participates in acquisition and restart
/// exactly like any other server.
pub struct ControlServer {
    commands: CommandSender,
}

impl ControlServer {
    pub fn new(commands: CommandSender) -> Self {
        Self { commands }
    }

    fn router(commands: CommandSender) -> Router {
        Router::new()
            .route(
                "/shutdown",
                any({
                    let commands = commands.clone();
                    move || handle_shutdown(commands.clone())
                }),
            )
            .route(
                "/restart",
                any({
                    let commands = commands.clone();
                    move || handle_restart(commands.clone())
                }),
            )
            .fallback(|| async { CommandResponse::error("unknown command") })
    }
}

async fn handle_shutdown(commands: CommandSender) -> CommandResponse {
    commands.send(CommandKind::Shutdown);
    CommandResponse::ok()
}

async fn handle_restart(commands: CommandSender) -> CommandResponse {
    let result_rx = commands.send_awaiting_result(CommandKind::Restart);
    match result_rx.await {
        Ok(Ok(())) => CommandResponse::ok(),
        Ok(Err(err)) => CommandResponse::error(err.to_string()),
        Err(_) => CommandResponse::error("worker dropped the restart request"),
    }
}

#[async_trait]
impl Server for ControlServer {
    async fn serve(&self, listener: Listener) -> std::result::Result<(), ServerError> {
        let router = Self::router(self.commands.clone());
        match listener {
            Listener::Tcp(tcp) => axum::serve(tcp, router)
                .await
                .map_err(|err| ServerError::Other(Box::new(err))),
            Listener::Unix(unix) => axum::serve(unix, router)
                .await
                .map_err(|err| ServerError::Other(Box::new(err))),
            Listener::InMemory => {
                error!("control endpoint cannot serve an in-memory listener");
                Err(ServerError::Other(Box::new(crate::listener::UnsupportedListenerType)))
            }
        }
    }

    async fn shutdown(&self, _ctx: ShutdownContext) -> std::result::Result<(), ServerError> {
        Ok(())
    }
}
