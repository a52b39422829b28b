use crate::error::AgentError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Result of one bounded console read. `Timeout` is not an error; it lets
/// the reader loop re-check process liveness during silence.
#[derive(Debug)]
pub enum ReadOutcome {
    Line(String),
    Timeout,
    Eof,
}

/// Owns the external agent's process handle: spawn, liveness, bounded line
/// reads over merged stdout/stderr, and forceful termination.
pub struct ProcessSupervisor {
    binary: String,
    config_dir: PathBuf,
    child: Option<Child>,
    lines: Option<mpsc::UnboundedReceiver<String>>,
}

impl ProcessSupervisor {
    pub fn new(binary: impl Into<String>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_dir: config_dir.into(),
            child: None,
            lines: None,
        }
    }

    pub fn has_process(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn `<binary> -f <config_dir>` and hand back its stdin for the
    /// command dispatcher. Both output streams are pumped into one line
    /// channel, so ordering between them follows arrival.
    pub fn start(&mut self) -> Result<ChildStdin, AgentError> {
        info!(
            "starting agent process: {} -f {}",
            self.binary,
            self.config_dir.display()
        );
        let mut child = Command::new(&self.binary)
            .arg("-f")
            .arg(&self.config_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Launch {
                binary: self.binary.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(AgentError::ProcessDied)?;
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        self.child = Some(child);
        self.lines = Some(rx);
        Ok(stdin)
    }

    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Pull the next console line, waiting at most `timeout`. `Eof` means
    /// the process closed its output (it is dead or dying).
    pub async fn read_line(&mut self, timeout: Duration) -> ReadOutcome {
        let Some(rx) = self.lines.as_mut() else {
            return ReadOutcome::Eof;
        };
        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => ReadOutcome::Timeout,
            Ok(None) => ReadOutcome::Eof,
            Ok(Some(line)) => ReadOutcome::Line(line),
        }
    }

    /// Wait briefly for a voluntary exit (the caller has already sent
    /// `/quit`), then force-kill. Idempotent, safe when already dead.
    pub async fn terminate(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if tokio::time::timeout(Duration::from_millis(1500), child.wait())
                .await
                .is_err()
            {
                warn!("agent process did not exit, killing");
            }
        }
        self.kill().await;
    }

    /// Force-kill and reap whatever is left. Idempotent.
    pub async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.start_kill().ok();
            child.wait().await.ok();
        }
        self.lines = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn stub_binary(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("stub-agent");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_start_missing_binary_is_launch_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sup = ProcessSupervisor::new("/nonexistent/agent-binary", tmp.path());
        match sup.start() {
            Err(AgentError::Launch { binary, .. }) => {
                assert_eq!(binary, "/nonexistent/agent-binary")
            }
            other => panic!("expected launch error, got {:?}", other.map(|_| ())),
        }
        assert!(!sup.has_process());
    }

    #[tokio::test]
    async fn test_reads_merged_output_until_eof() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = stub_binary(tmp.path(), "echo out-line\necho err-line >&2");
        let mut sup = ProcessSupervisor::new(bin, tmp.path());
        let _stdin = sup.start().unwrap();

        let mut lines = Vec::new();
        loop {
            match sup.read_line(Duration::from_secs(5)).await {
                ReadOutcome::Line(line) => lines.push(line),
                ReadOutcome::Timeout => continue,
                ReadOutcome::Eof => break,
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["err-line".to_string(), "out-line".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_on_silent_process() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = stub_binary(tmp.path(), "sleep 30");
        let mut sup = ProcessSupervisor::new(bin, tmp.path());
        let _stdin = sup.start().unwrap();

        assert!(matches!(
            sup.read_line(Duration::from_millis(50)).await,
            ReadOutcome::Timeout
        ));
        assert!(sup.is_alive());
        sup.kill().await;
        assert!(!sup.has_process());
    }

    #[tokio::test]
    async fn test_is_alive_after_exit() {
        let tmp = tempfile::tempdir().unwrap();
        let bin = stub_binary(tmp.path(), "true");
        let mut sup = ProcessSupervisor::new(bin, tmp.path());
        let _stdin = sup.start().unwrap();

        // drain until the output closes, then the process is gone
        while !matches!(sup.read_line(Duration::from_secs(5)).await, ReadOutcome::Eof) {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sup.is_alive());
        // kill is idempotent on an already-dead process
        sup.kill().await;
        sup.kill().await;
    }
}
