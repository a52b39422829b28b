use crate::error::AgentError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Writes newline-terminated commands to the agent's stdin.
///
/// Sends are serialized behind an async mutex so concurrent callers cannot
/// interleave partial commands. The readiness gate opens once registration
/// succeeds and stays open for the rest of the session.
pub struct CommandSender {
    stdin: Mutex<Option<ChildStdin>>,
    ready: AtomicBool,
}

impl CommandSender {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub(crate) fn set_ready(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            info!("agent ready for commands");
        }
    }

    pub(crate) async fn attach(&self, stdin: ChildStdin) {
        *self.stdin.lock().await = Some(stdin);
    }

    pub(crate) async fn detach(&self) {
        *self.stdin.lock().await = None;
    }

    /// Send a command, refusing (as a logged no-op) while the agent has not
    /// completed registration. Never queues or retries.
    pub async fn send(&self, command: &str) -> Result<(), AgentError> {
        if !self.is_ready() {
            warn!("{} not executed, agent not ready", command);
            return Err(AgentError::NotReady(command.to_string()));
        }
        self.send_raw(command).await
    }

    /// Write a command regardless of the readiness gate. Account
    /// registration and `/quit` are accepted by the agent before login.
    pub(crate) async fn send_raw(&self, command: &str) -> Result<(), AgentError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(AgentError::ProcessDied)?;
        stdin.write_all(command.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

impl Default for CommandSender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_ready_is_noop() {
        let sender = CommandSender::new();
        assert!(!sender.is_ready());
        match sender.send("/dial 12345").await {
            Err(AgentError::NotReady(cmd)) => assert_eq!(cmd, "/dial 12345"),
            other => panic!("expected not-ready error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ready_transitions_once() {
        let sender = CommandSender::new();
        sender.set_ready();
        assert!(sender.is_ready());
        sender.set_ready();
        assert!(sender.is_ready());
    }

    #[tokio::test]
    async fn test_send_without_process_reports_death() {
        let sender = CommandSender::new();
        sender.set_ready();
        assert!(matches!(
            sender.send("/listcalls").await,
            Err(AgentError::ProcessDied)
        ));
    }

    #[tokio::test]
    async fn test_raw_send_bypasses_gate_but_needs_process() {
        let sender = CommandSender::new();
        assert!(matches!(
            sender.send_raw("/uanew sip:a@b").await,
            Err(AgentError::ProcessDied)
        ));
    }
}
