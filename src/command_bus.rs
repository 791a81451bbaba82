//! The in-process command bus (spec.md §4.4): lets any part of the host
//! application (a signal handler, an HTTP admin endpoint, a CLI prompt)
//! ask the worker's controller task to shut down or restart, without
//! coupling the caller to exactly how that's carried out.

use tokio::sync::{mpsc, oneshot};

/// What a command's issuer wants to know once the controller has acted
/// on it. `Ok(())` for shutdown means "drain completed (possibly after
/// timing out — see the worker runtime's logs for which)"; for restart
/// it means "the restart signal was forwarded", not "the new generation
/// is up".
pub type CommandResult = std::result::Result<(), CommandError>;

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    /// Restart was requested but this process has no supervising parent
    /// to delegate to (spec.md §4.7: `getppid() == 1`).
    #[error("no supervisor to delegate a restart to")]
    NoSupervisor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Shutdown,
    Restart,
}

/// A command plus an optional channel to report its outcome back to the
/// issuer. `result_sink` is `None` for fire-and-forget callers (e.g. a
/// signal handler that has nowhere to report back to).
pub struct Command {
    pub kind: CommandKind,
    pub result_sink: Option<oneshot::Sender<CommandResult>>,
}

impl Command {
    pub fn fire_and_forget(kind: CommandKind) -> Self {
        Self {
            kind,
            result_sink: None,
        }
    }

    pub fn reply(self, result: CommandResult) {
        if let Some(sink) = self.result_sink {
            let _ = sink.send(result);
        }
    }
}

/// The sending half, cheaply cloneable so every caller site (signal task,
/// control endpoint, ...) can hold its own handle.
#[derive(Clone)]
pub struct CommandSender(mpsc::UnboundedSender<Command>);

impl CommandSender {
    /// Enqueues a command without waiting for its result.
    pub fn send(&self, kind: CommandKind) {
        let _ = self.0.send(Command::fire_and_forget(kind));
    }

    /// Enqueues a command and returns a receiver for its eventual result.
    pub fn send_awaiting_result(&self, kind: CommandKind) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        let _ = self.0.send(Command {
            kind,
            result_sink: Some(tx),
        });
        rx
    }
}

pub struct CommandReceiver(mpsc::UnboundedReceiver<Command>);

impl CommandReceiver {
    pub async fn recv(&mut self) -> Option<Command> {
        self.0.recv().await
    }
}

/// The bus itself: construct one per worker, give clones of the sender
/// to every command source, and hand the receiver to the worker's
/// controller task.
pub struct CommandBus;

impl CommandBus {
    pub fn channel() -> (CommandSender, CommandReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandSender(tx), CommandReceiver(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fire_and_forget_has_no_result_sink() {
        let (tx, mut rx) = CommandBus::channel();
        tx.send(CommandKind::Shutdown);
        let cmd = rx.recv().await.unwrap();
        assert_eq!(cmd.kind, CommandKind::Shutdown);
        assert!(cmd.result_sink.is_none());
    }

    #[tokio::test]
    async fn awaiting_result_round_trips_through_reply() {
        let (tx, mut rx) = CommandBus::channel();
        let result_rx = tx.send_awaiting_result(CommandKind::Restart);
        let cmd = rx.recv().await.unwrap();
        assert_eq!(cmd.kind, CommandKind::Restart);
        cmd.reply(Err(CommandError::NoSupervisor));
        assert_eq!(result_rx.await.unwrap(), Err(CommandError::NoSupervisor));
    }

    #[tokio::test]
    async fn dropping_sender_closes_receiver() {
        let (tx, mut rx) = CommandBus::channel();
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
