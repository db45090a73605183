// Engine process capability for Parley
// Spawning is a trait seam so the supervisor can be driven by a scripted
// engine in tests; CliLauncher is the real thing

use async_trait::async_trait;
use log::warn;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::EngineError;

/// Line-oriented handles to a running engine process. stdout/stderr
/// arrive one line per message; lines sent to stdin get a trailing
/// newline appended.
pub struct EngineIo {
    pub stdout: mpsc::Receiver<String>,
    pub stderr: mpsc::Receiver<String>,
    pub stdin: mpsc::Sender<String>,
}

#[async_trait]
pub trait EngineHandle: Send {
    async fn kill(&mut self);
}

#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(
        &self,
        port: u16,
        database_path: &Path,
    ) -> Result<(EngineIo, Box<dyn EngineHandle>), EngineError>;
}

/// Launches the real engine binary: `<binary> -p <port> -d <db-path>`.
pub struct CliLauncher {
    binary: PathBuf,
}

impl CliLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        CliLauncher {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EngineLauncher for CliLauncher {
    async fn launch(
        &self,
        port: u16,
        database_path: &Path,
    ) -> Result<(EngineIo, Box<dyn EngineHandle>), EngineError> {
        let mut child = Command::new(&self.binary)
            .arg("-p")
            .arg(port.to_string())
            .arg("-d")
            .arg(database_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn {
                binary: self.binary.display().to_string(),
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| EngineError::Spawn {
            binary: self.binary.display().to_string(),
            reason: "stdout not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| EngineError::Spawn {
            binary: self.binary.display().to_string(),
            reason: "stderr not captured".to_string(),
        })?;
        let mut stdin = child.stdin.take().ok_or_else(|| EngineError::Spawn {
            binary: self.binary.display().to_string(),
            reason: "stdin not captured".to_string(),
        })?;

        let (stdout_tx, stdout_rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stdout_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        let (stderr_tx, stderr_rx) = mpsc::channel(100);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if stderr_tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(16);
        tokio::spawn(async move {
            while let Some(line) = stdin_rx.recv().await {
                let payload = format!("{}\n", line);
                if stdin.write_all(payload.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let io = EngineIo {
            stdout: stdout_rx,
            stderr: stderr_rx,
            stdin: stdin_tx,
        };
        Ok((io, Box::new(CliHandle { child })))
    }
}

struct CliHandle {
    child: Child,
}

#[async_trait]
impl EngineHandle for CliHandle {
    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill engine process: {}", e);
        }
    }
}
