// Protocol client for Parley
// Multiplexes one engine connection into many outstanding command/response
// exchanges and fans push events out to subscribers

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, Mutex as TokioMutex};

pub mod commands;
pub mod connection;
pub mod response;

pub use commands::{
    AutoAccept, ChatCommand, ChatPagination, ChatType, CommandEnvelope, ComposedMessage,
};
pub use connection::ClientState;
pub use response::{ChatResponse, ServerEnvelope};

/// Responses to `send_and_await` are expected well inside this window; a
/// command the engine never answers resolves to `TimedOut` instead of
/// suspending its caller forever.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("connection closed before the response arrived")]
    Disconnected,
    #[error("no response to command {corr_id} within {timeout:?}")]
    TimedOut { corr_id: String, timeout: Duration },
    #[error("transport is down, command not sent")]
    SendFailed,
    #[error("unknown correlation id {0}")]
    UnknownCorrId(String),
}

/// Read-only view of one sent command, for the diagnostic command console.
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub corr_id: String,
    pub cmd: String,
    pub response: Option<ChatResponse>,
}

// One record per command sent on this connection. Retained after
// resolution so late `await_response` calls and the console see the same
// answer; `waiters` is drained exactly once.
struct PendingCommand {
    cmd: String,
    response: Option<ServerEnvelope>,
    waiters: Vec<oneshot::Sender<ServerEnvelope>>,
}

pub type SubscriptionId = u64;

enum EventFilter {
    Tag(String),
    Any,
}

struct Subscriber {
    id: SubscriptionId,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<ServerEnvelope>,
}

/// Handle returned from `subscribe`/`subscribe_all`. Pass its id to
/// `unsubscribe` on teardown; after unsubscribe (or disconnect) `recv`
/// drains what was already queued and then yields `None`.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<ServerEnvelope>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<ServerEnvelope> {
        self.rx.recv().await
    }
}

pub(crate) struct ClientShared {
    pending: TokioMutex<HashMap<String, PendingCommand>>,
    subscribers: TokioMutex<Vec<Subscriber>>,
    state_tx: watch::Sender<ClientState>,
}

impl ClientShared {
    fn new(state_tx: watch::Sender<ClientState>) -> Self {
        ClientShared {
            pending: TokioMutex::new(HashMap::new()),
            subscribers: TokioMutex::new(Vec::new()),
            state_tx,
        }
    }

    // Inbound dispatch, run to completion per message in arrival order:
    // resolve the correlated waiter first, then tag subscribers, then
    // wildcard subscribers, each in subscription order.
    pub(crate) async fn dispatch(&self, text: &str) {
        let envelope: ServerEnvelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping undecodable engine message: {}", e);
                return;
            }
        };

        if let Some(corr_id) = envelope.corr_id.clone() {
            let mut pending = self.pending.lock().await;
            match pending.get_mut(&corr_id) {
                Some(record) if record.response.is_none() => {
                    record.response = Some(envelope.clone());
                    for waiter in record.waiters.drain(..) {
                        let _ = waiter.send(envelope.clone());
                    }
                }
                Some(_) => debug!("Duplicate response for correlation id {}", corr_id),
                None => debug!("Response for unknown correlation id {}", corr_id),
            }
        }

        let mut subscribers = self.subscribers.lock().await;
        let tag = envelope.resp.tag();
        let mut dead: Vec<SubscriptionId> = Vec::new();
        for sub in subscribers.iter() {
            if matches!(&sub.filter, EventFilter::Tag(t) if t.as_str() == tag)
                && sub.tx.send(envelope.clone()).is_err()
            {
                dead.push(sub.id);
            }
        }
        for sub in subscribers.iter() {
            if matches!(sub.filter, EventFilter::Any) && sub.tx.send(envelope.clone()).is_err() {
                dead.push(sub.id);
            }
        }
        if !dead.is_empty() {
            subscribers.retain(|s| !dead.contains(&s.id));
        }
    }

    // Tear the session down: every suspended waiter resolves with
    // Disconnected (its sender is dropped here) and subscriber channels
    // close after draining.
    pub(crate) async fn shutdown(&self) {
        let _ = self.state_tx.send(ClientState::Disconnected);
        let mut pending = self.pending.lock().await;
        for record in pending.values_mut() {
            record.waiters.clear();
        }
        drop(pending);
        self.subscribers.lock().await.clear();
    }
}

/// One live connection to the chat engine. Constructed by
/// `ChatClient::connect`; the supervisor owns the only instance and hands
/// it down, so there is no global lookup.
pub struct ChatClient {
    corr_id: AtomicU64,
    next_subscription: AtomicU64,
    shared: Arc<ClientShared>,
    outbound: TokioMutex<Option<mpsc::Sender<String>>>,
}

impl ChatClient {
    /// Encode, assign a fresh correlation id, record the pending command
    /// and transmit. Returns immediately with the correlation id; exactly
    /// one frame goes out per call.
    pub async fn send_command(&self, command: &ChatCommand) -> Result<String, ClientError> {
        self.send_raw(command.command_text()).await
    }

    /// Transmit raw command text (the console lets users type commands the
    /// typed vocabulary does not cover yet).
    pub async fn send_raw(&self, cmd: impl Into<String>) -> Result<String, ClientError> {
        let cmd = cmd.into();
        let corr_id = self.corr_id.fetch_add(1, Ordering::SeqCst).to_string();
        let envelope = CommandEnvelope {
            corr_id: Some(corr_id.clone()),
            cmd: cmd.clone(),
        };
        let payload = serde_json::to_string(&envelope).map_err(|_| ClientError::SendFailed)?;

        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                corr_id.clone(),
                PendingCommand {
                    cmd,
                    response: None,
                    waiters: Vec::new(),
                },
            );
        }

        let outbound = self.outbound.lock().await;
        let sender = outbound.as_ref().ok_or(ClientError::SendFailed)?;
        sender
            .send(payload)
            .await
            .map_err(|_| ClientError::SendFailed)?;
        debug!("Sent command {}", corr_id);
        Ok(corr_id)
    }

    /// Suspend until the response with this correlation id arrives. A
    /// response that already arrived is returned immediately (repeatable
    /// read from the pending record), so multiple callers each get the
    /// same payload. No internal timeout; see `await_response_timeout`.
    pub async fn await_response(&self, corr_id: &str) -> Result<ChatResponse, ClientError> {
        let rx = {
            let mut pending = self.shared.pending.lock().await;
            let record = pending
                .get_mut(corr_id)
                .ok_or_else(|| ClientError::UnknownCorrId(corr_id.to_string()))?;
            if let Some(envelope) = &record.response {
                return Ok(envelope.resp.clone());
            }
            if !self.is_connected() {
                return Err(ClientError::Disconnected);
            }
            let (tx, rx) = oneshot::channel();
            record.waiters.push(tx);
            rx
        };
        match rx.await {
            Ok(envelope) => Ok(envelope.resp),
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    pub async fn await_response_timeout(
        &self,
        corr_id: &str,
        timeout: Duration,
    ) -> Result<ChatResponse, ClientError> {
        match tokio::time::timeout(timeout, self.await_response(corr_id)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::TimedOut {
                corr_id: corr_id.to_string(),
                timeout,
            }),
        }
    }

    /// Send and wait for the matching response. Command errors come back
    /// as a `ChatCmdError` payload, not an `Err`; callers branch on it.
    pub async fn send_and_await(&self, command: &ChatCommand) -> Result<ChatResponse, ClientError> {
        let corr_id = self.send_command(command).await?;
        self.await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Subscribe to pushes with a specific `type` tag. Subscribers are
    /// notified in subscription order.
    pub async fn subscribe(&self, tag: impl Into<String>) -> Subscription {
        self.add_subscriber(EventFilter::Tag(tag.into())).await
    }

    /// Subscribe to every inbound message regardless of tag.
    pub async fn subscribe_all(&self) -> Subscription {
        self.add_subscriber(EventFilter::Any).await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.shared.subscribers.lock().await;
        subscribers.retain(|s| s.id != id);
    }

    async fn add_subscriber(&self, filter: EventFilter) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.shared.subscribers.lock().await;
        subscribers.push(Subscriber { id, filter, tx });
        Subscription { id, rx }
    }

    /// Echo/audit view over every command sent on this connection, in
    /// send order.
    pub async fn sent_commands(&self) -> Vec<SentCommand> {
        let pending = self.shared.pending.lock().await;
        let mut commands: Vec<SentCommand> = pending
            .iter()
            .map(|(corr_id, record)| SentCommand {
                corr_id: corr_id.clone(),
                cmd: record.cmd.clone(),
                response: record.response.as_ref().map(|e| e.resp.clone()),
            })
            .collect();
        commands.sort_by_key(|c| c.corr_id.parse::<u64>().unwrap_or(u64::MAX));
        commands
    }

    pub async fn sent_command(&self, corr_id: &str) -> Option<SentCommand> {
        let pending = self.shared.pending.lock().await;
        pending.get(corr_id).map(|record| SentCommand {
            corr_id: corr_id.to_string(),
            cmd: record.cmd.clone(),
            response: record.response.as_ref().map(|e| e.resp.clone()),
        })
    }
}

// Convenience wrappers for the operations the application issues directly.
impl ChatClient {
    pub async fn api_get_active_user(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ShowActiveUser).await
    }

    pub async fn api_list_users(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ListUsers).await
    }

    pub async fn api_list_contacts(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ListContacts).await
    }

    pub async fn api_list_groups(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ListGroups).await
    }

    pub async fn api_create_address(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::CreateMyAddress).await
    }

    pub async fn api_show_address(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ShowMyAddress).await
    }

    pub async fn api_set_auto_accept(&self) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::AddressAutoAccept {
            auto_accept: Some(AutoAccept {
                accept_incognito: true,
                auto_reply: None,
            }),
        })
        .await
    }

    pub async fn api_get_chats(&self, user_id: u64) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ApiGetChats { user_id }).await
    }

    pub async fn api_get_chat(
        &self,
        chat_type: ChatType,
        chat_id: u64,
        pagination: ChatPagination,
    ) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ApiGetChat {
            chat_type,
            chat_id,
            pagination,
            search: None,
        })
        .await
    }

    pub async fn api_send_messages(
        &self,
        chat_type: ChatType,
        chat_id: u64,
        messages: Vec<ComposedMessage>,
    ) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::ApiSendMessage {
            chat_type,
            chat_id,
            messages,
        })
        .await
    }

    pub async fn api_connect(&self, conn_req: impl Into<String>) -> Result<String, ClientError> {
        self.send_command(&ChatCommand::Connect {
            conn_req: conn_req.into(),
        })
        .await
    }
}
