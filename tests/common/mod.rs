// Common test utilities for integration tests
// Contains the in-process engine stub (WebSocket side and process side)
// and JSON builders for wire payloads

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::LevelFilter;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, Once};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use parley::client::commands::CommandEnvelope;
use parley::engine::{EngineError, EngineHandle, EngineIo, EngineLauncher};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// Responder script for the stub engine: given a received command
/// envelope, produce zero or more raw frames to send back.
pub type Responder = Box<dyn Fn(&CommandEnvelope) -> Vec<String> + Send + Sync>;

/// In-process stand-in for the chat engine's WebSocket server. Accepts a
/// single connection, answers each command through the responder, and
/// forwards anything written to `push_tx` as an unsolicited frame.
pub struct StubEngine {
    pub url: String,
    pub push_tx: mpsc::UnboundedSender<String>,
    pub received_rx: mpsc::UnboundedReceiver<CommandEnvelope>,
}

pub async fn spawn_stub_engine(responder: Responder) -> StubEngine {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub engine");
    let addr = listener.local_addr().expect("stub engine addr");
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let (received_tx, received_rx) = mpsc::unbounded_channel::<CommandEnvelope>();

    tokio::spawn(async move {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("websocket handshake");
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                push = push_rx.recv() => match push {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let envelope: CommandEnvelope = match serde_json::from_str(&text) {
                            Ok(envelope) => envelope,
                            Err(_) => continue,
                        };
                        let replies = responder(&envelope);
                        let _ = received_tx.send(envelope);
                        for reply in replies {
                            if sink.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
            }
        }
    });

    StubEngine {
        url: format!("ws://{}", addr),
        push_tx,
        received_rx,
    }
}

/// Standard polling interval for tests that wait on the fold task.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const POLL_ATTEMPTS: usize = 200;

// ---------------------------------------------------------------------------
// Wire payload builders
// ---------------------------------------------------------------------------

pub fn envelope(corr_id: Option<&str>, resp: Value) -> String {
    let mut frame = json!({ "resp": resp });
    if let Some(id) = corr_id {
        frame["corrId"] = Value::String(id.to_string());
    }
    frame.to_string()
}

pub fn user(user_id: u64, name: &str) -> Value {
    json!({
        "userId": user_id,
        "localDisplayName": name,
        "profile": { "displayName": name, "fullName": name },
        "activeUser": true
    })
}

pub fn contact(contact_id: u64, name: &str) -> Value {
    json!({
        "contactId": contact_id,
        "localDisplayName": name,
        "profile": { "displayName": name, "fullName": name }
    })
}

pub fn group_info(group_id: u64, name: &str) -> Value {
    json!({
        "groupId": group_id,
        "localDisplayName": name,
        "groupProfile": { "displayName": name, "fullName": name }
    })
}

pub fn chat_item(item_id: u64, text: &str) -> Value {
    json!({
        "chatDir": { "type": "directRcv" },
        "meta": {
            "itemId": item_id,
            "itemTs": "2024-05-01T12:00:00Z",
            "itemText": text
        },
        "content": {
            "type": "rcvMsgContent",
            "msgContent": { "type": "text", "text": text }
        }
    })
}

pub fn direct_chat_info(contact: Value) -> Value {
    json!({ "type": "direct", "contact": contact })
}

pub fn group_chat_info(group_info: Value) -> Value {
    json!({ "type": "group", "groupInfo": group_info })
}

pub fn active_user_resp(user_id: u64, name: &str) -> Value {
    json!({ "type": "activeUser", "user": user(user_id, name) })
}

pub fn users_list_resp(users: Vec<Value>) -> Value {
    json!({
        "type": "usersList",
        "users": users.into_iter().map(|u| json!({ "user": u, "unreadCount": 0 })).collect::<Vec<_>>()
    })
}

pub fn contacts_list_resp(contacts: Vec<Value>) -> Value {
    json!({ "type": "contactsList", "contacts": contacts })
}

pub fn groups_list_resp(groups: Vec<Value>) -> Value {
    json!({ "type": "groupsList", "groups": groups })
}

pub fn new_chat_items_resp(chat_info: Value, items: Vec<Value>) -> Value {
    json!({
        "type": "newChatItems",
        "chatItems": items
            .into_iter()
            .map(|item| json!({ "chatInfo": chat_info, "chatItem": item }))
            .collect::<Vec<_>>()
    })
}

pub fn api_chats_resp(chats: Vec<Value>) -> Value {
    json!({ "type": "apiChats", "chats": chats })
}

pub fn chat(chat_info: Value, items: Vec<Value>) -> Value {
    json!({ "chatInfo": chat_info, "chatItems": items })
}

// ---------------------------------------------------------------------------
// Scripted engine process
// ---------------------------------------------------------------------------

/// Plays back canned stdout/stderr lines instead of spawning anything,
/// recording attempted ports and everything written to stdin.
pub struct ScriptedLauncher {
    /// Ports that respond with the address-in-use stderr line.
    pub conflict_ports: Vec<u16>,
    /// Whether stdout prints the first-run profile prompt.
    pub first_run: bool,
    pub attempts: StdMutex<Vec<u16>>,
    pub stdin_lines: Arc<StdMutex<Vec<String>>>,
}

impl ScriptedLauncher {
    pub fn new(conflict_ports: Vec<u16>, first_run: bool) -> Self {
        ScriptedLauncher {
            conflict_ports,
            first_run,
            attempts: StdMutex::new(Vec::new()),
            stdin_lines: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn attempted_ports(&self) -> Vec<u16> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        port: u16,
        _database_path: &Path,
    ) -> Result<(EngineIo, Box<dyn EngineHandle>), EngineError> {
        self.attempts.lock().unwrap().push(port);

        let (stdout_tx, stdout_rx) = mpsc::channel(16);
        let (stderr_tx, stderr_rx) = mpsc::channel(16);
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(16);

        if self.conflict_ports.contains(&port) {
            let _ = stderr_tx
                .send(format!("bind: Address already in use (port {})", port))
                .await;
        } else if self.first_run {
            let _ = stdout_tx
                .send("No user profiles found, it will be created now.".to_string())
                .await;
        }

        let stdin_lines = Arc::clone(&self.stdin_lines);
        tokio::spawn(async move {
            // Holding the senders keeps stdout/stderr open for the
            // lifetime of the scripted process.
            let _stdout_tx = stdout_tx;
            let _stderr_tx = stderr_tx;
            while let Some(line) = stdin_rx.recv().await {
                stdin_lines.lock().unwrap().push(line);
            }
        });

        let io = EngineIo {
            stdout: stdout_rx,
            stderr: stderr_rx,
            stdin: stdin_tx,
        };
        Ok((io, Box::new(ScriptedHandle)))
    }
}

struct ScriptedHandle;

#[async_trait]
impl EngineHandle for ScriptedHandle {
    async fn kill(&mut self) {}
}
