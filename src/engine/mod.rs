// Connection supervisor for Parley
// Owns the external chat-engine process and the one live ChatClient:
// spawn, port-conflict respawn, bounded connect retry, teardown

use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

pub mod process;

pub use process::{CliLauncher, EngineHandle, EngineIo, EngineLauncher};

use crate::client::{ChatClient, ClientState};

/// Literal the engine prints on a fresh database, answered with the
/// configured display name.
pub const PROFILE_PROMPT: &str = "No user profiles found, it will be created now.";
/// Literal the engine prints on stderr when the candidate port is taken.
pub const ADDRESS_IN_USE: &str = "Address already in use";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn chat engine {binary}: {reason}")]
    Spawn { binary: String, reason: String },
    #[error("no free port in {attempts} attempts starting at {base_port}")]
    PortsExhausted { base_port: u16, attempts: u16 },
    #[error("could not connect to the engine at {url} after {retries} attempts")]
    ConnectFailed { url: String, retries: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Spawning,
    AwaitingReady,
    Connecting,
    Connected,
    Retrying,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub host: String,
    pub base_port: u16,
    pub database_path: PathBuf,
    pub display_name: String,
    /// Upper bound on port-conflict respawns; guarantees termination.
    pub max_port_attempts: u16,
    pub connect_retries: u32,
    pub connect_backoff: Duration,
    /// The engine has no reliable readiness marker; this is how long the
    /// supervisor waits after spawn before connecting.
    pub ready_grace: Duration,
}

impl EngineConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        EngineConfig {
            binary: PathBuf::from("simplex-chat"),
            host: "127.0.0.1".to_string(),
            base_port: 5225,
            database_path: database_path.into(),
            display_name: "parley".to_string(),
            max_port_attempts: 10,
            connect_retries: 3,
            connect_backoff: Duration::from_secs(1),
            ready_grace: Duration::from_secs(1),
        }
    }

    /// Engine database under the platform application-data directory.
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("parley"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley-engine.db")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(EngineConfig::default_database_path())
    }
}

/// Supervisor for the engine process and its connection. The application
/// constructs exactly one and threads it through; `start` on a live
/// engine returns the existing client instead of spawning a twin.
pub struct ChatEngine {
    config: EngineConfig,
    launcher: Arc<dyn EngineLauncher>,
    status_tx: watch::Sender<EngineStatus>,
    client: Option<Arc<ChatClient>>,
    handle: Option<Box<dyn EngineHandle>>,
    port: u16,
}

impl ChatEngine {
    pub fn new(config: EngineConfig, launcher: Arc<dyn EngineLauncher>) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::Idle);
        let port = config.base_port;
        ChatEngine {
            config,
            launcher,
            status_tx,
            client: None,
            handle: None,
            port,
        }
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Candidate port of the current (or next) spawn.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.config.host, self.port)
    }

    pub fn client(&self) -> Option<Arc<ChatClient>> {
        self.client.clone()
    }

    /// Bring the engine up and connect to it. Re-entrant: while the
    /// previous client is still connected this returns it untouched.
    pub async fn start(&mut self) -> Result<Arc<ChatClient>, EngineError> {
        if let Some(client) = &self.client {
            if client.is_connected() {
                debug!("Engine already running, reusing live client");
                return Ok(Arc::clone(client));
            }
        }

        self.spawn_engine().await?;
        let client = match self.connect_with_retry().await {
            Ok(client) => client,
            Err(e) => {
                // Terminal connect failure; do not leave an orphan process.
                if let Some(mut handle) = self.handle.take() {
                    handle.kill().await;
                }
                return Err(e);
            }
        };

        self.watch_close(&client);
        self.client = Some(Arc::clone(&client));
        self.set_status(EngineStatus::Connected);
        Ok(client)
    }

    /// Disconnect and kill the engine process.
    pub async fn shutdown(&mut self) {
        info!("Shutting down chat engine");
        if let Some(client) = self.client.take() {
            client.disconnect().await;
        }
        if let Some(mut handle) = self.handle.take() {
            handle.kill().await;
        }
        self.set_status(EngineStatus::Disconnected);
    }

    // Spawn on base_port, walking up one port per "address in use"
    // signal until the bound is hit.
    async fn spawn_engine(&mut self) -> Result<(), EngineError> {
        let attempts = self.config.max_port_attempts.max(1);
        for attempt in 0..attempts {
            let port = self.config.base_port + attempt;
            self.port = port;
            self.set_status(EngineStatus::Spawning);
            info!(
                "Spawning chat engine on port {} (database {})",
                port,
                self.config.database_path.display()
            );
            let (io, mut handle) = self
                .launcher
                .launch(port, &self.config.database_path)
                .await?;
            self.set_status(EngineStatus::AwaitingReady);

            let stdin = io.stdin.clone();
            spawn_stdout_watcher(io.stdout, stdin, self.config.display_name.clone());
            let mut conflict_rx = spawn_stderr_watcher(io.stderr);

            tokio::select! {
                _ = tokio::time::sleep(self.config.ready_grace) => {
                    self.handle = Some(handle);
                    return Ok(());
                }
                signal = &mut conflict_rx => {
                    if signal.is_ok() {
                        warn!("Port {} already in use, trying {}", port, port + 1);
                        handle.kill().await;
                        continue;
                    }
                    // stderr closed without a conflict; sit out the rest
                    // of the grace window and proceed.
                    tokio::time::sleep(self.config.ready_grace).await;
                    self.handle = Some(handle);
                    return Ok(());
                }
            }
        }
        error!(
            "No free port in {} attempts starting at {}",
            attempts, self.config.base_port
        );
        Err(EngineError::PortsExhausted {
            base_port: self.config.base_port,
            attempts,
        })
    }

    async fn connect_with_retry(&mut self) -> Result<Arc<ChatClient>, EngineError> {
        let url = self.url();
        let retries = self.config.connect_retries.max(1);
        for attempt in 1..=retries {
            self.set_status(EngineStatus::Connecting);
            match ChatClient::connect(&url).await {
                Ok(client) => {
                    info!("Connected on attempt {}/{}", attempt, retries);
                    return Ok(Arc::new(client));
                }
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, retries, e);
                    if attempt < retries {
                        self.set_status(EngineStatus::Retrying);
                        tokio::time::sleep(self.config.connect_backoff).await;
                    }
                }
            }
        }
        error!("Could not reach the engine at {}", url);
        Err(EngineError::ConnectFailed { url, retries })
    }

    // Mirror the transport closing into the engine status. No automatic
    // reconnect: bringing the pair back is an explicit start() call.
    fn watch_close(&self, client: &Arc<ChatClient>) {
        let mut state = client.state();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            while state.changed().await.is_ok() {
                if *state.borrow() == ClientState::Disconnected {
                    info!("Engine connection closed");
                    let _ = status_tx.send(EngineStatus::Disconnected);
                    break;
                }
            }
        });
    }

    fn set_status(&self, status: EngineStatus) {
        let _ = self.status_tx.send(status);
    }
}

// Logs engine output and answers the first-run profile prompt with the
// configured display name. Runs for the life of the process.
fn spawn_stdout_watcher(
    mut stdout: mpsc::Receiver<String>,
    stdin: mpsc::Sender<String>,
    display_name: String,
) {
    tokio::spawn(async move {
        while let Some(line) = stdout.recv().await {
            debug!("engine: {}", line);
            if line.contains(PROFILE_PROMPT) {
                info!("First run: registering profile '{}'", display_name);
                if stdin.send(display_name.clone()).await.is_err() {
                    break;
                }
            }
        }
    });
}

// Scans stderr for the port-conflict literal; fires the returned signal
// at most once.
fn spawn_stderr_watcher(mut stderr: mpsc::Receiver<String>) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut tx = Some(tx);
        while let Some(line) = stderr.recv().await {
            if line.contains(ADDRESS_IN_USE) {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
            } else {
                warn!("engine stderr: {}", line);
            }
        }
    });
    rx
}
