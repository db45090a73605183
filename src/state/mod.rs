// Chat state for Parley
// Folds the engine's event stream into normalized collections (users,
// contacts, groups, per-conversation logs) the view layer renders from

use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;

use crate::client::commands::{ChatCommand, ChatPagination, ChatType};
use crate::client::response::{
    AChatItem, Chat, ChatInfo, ChatItem, ChatResponse, Contact, GroupInfo, GroupMember,
    ServerEnvelope, User, UserInfo,
};
use crate::client::{ChatClient, ClientError, DEFAULT_COMMAND_TIMEOUT};

/// Type-tagged conversation key; direct and group ids never collide in
/// the message-log map even when the numeric ids do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct(u64),
    Group(u64),
}

impl ConversationKey {
    pub fn from_chat_info(chat_info: &ChatInfo) -> Option<Self> {
        match chat_info {
            ChatInfo::Direct { contact } => Some(ConversationKey::Direct(contact.contact_id)),
            ChatInfo::Group { group_info } => Some(ConversationKey::Group(group_info.group_id)),
            ChatInfo::ContactRequest { .. } | ChatInfo::Unknown => None,
        }
    }

    pub fn from_parts(chat_type: ChatType, chat_id: u64) -> Option<Self> {
        match chat_type {
            ChatType::Direct => Some(ConversationKey::Direct(chat_id)),
            ChatType::Group => Some(ConversationKey::Group(chat_id)),
            ChatType::ContactRequest => None,
        }
    }

    pub fn chat_type(&self) -> ChatType {
        match self {
            ConversationKey::Direct(_) => ChatType::Direct,
            ConversationKey::Group(_) => ChatType::Group,
        }
    }

    pub fn chat_id(&self) -> u64 {
        match self {
            ConversationKey::Direct(id) | ConversationKey::Group(id) => *id,
        }
    }
}

/// A group as the reducer tracks it: info from the listing, members
/// filled in lazily by the follow-up members fetch.
#[derive(Debug, Clone)]
pub struct Group {
    pub info: GroupInfo,
    pub members: Vec<GroupMember>,
}

/// Normalized chat state. Owned exclusively by the `ChatStore` fold task;
/// `apply` is a pure fold that returns the follow-up commands the event
/// calls for instead of sending them itself.
#[derive(Debug, Default)]
pub struct ChatState {
    pub active_user: Option<User>,
    pub users: Vec<UserInfo>,
    pub contacts: HashMap<u64, Contact>,
    pub groups: HashMap<u64, Group>,
    pub chats: HashMap<ConversationKey, Vec<ChatItem>>,
    pub contact_link: Option<String>,
    pub selected_chat: Option<ConversationKey>,
    // Open backfill fences: pushes folded while a fetch is in flight are
    // recorded here and re-applied over the arriving snapshot so the
    // snapshot cannot erase them.
    pending_fetches: HashMap<ConversationKey, Vec<ChatItem>>,
}

impl ChatState {
    pub fn new() -> Self {
        ChatState::default()
    }

    /// Fold one event. Idempotent per event shape: replaying a listing or
    /// snapshot leaves the state it already produced.
    pub fn apply(&mut self, resp: &ChatResponse) -> Vec<ChatCommand> {
        let mut follow_ups = Vec::new();
        match resp {
            ChatResponse::ActiveUser { user } => {
                let changed =
                    self.active_user.as_ref().map(|u| u.user_id) != Some(user.user_id);
                if changed {
                    // Switching user invalidates whatever conversation was open.
                    self.selected_chat = None;
                }
                if !self.users.iter().any(|u| u.user.user_id == user.user_id) {
                    follow_ups.push(ChatCommand::ListUsers);
                }
                self.active_user = Some(user.clone());
                // The engine scopes /contacts to its active user; exactly
                // one refresh per activeUser event.
                follow_ups.push(ChatCommand::ListContacts);
            }
            ChatResponse::UsersList { users } => {
                self.users = users.clone();
            }
            ChatResponse::ContactsList { contacts, .. } => {
                self.contacts = contacts
                    .iter()
                    .map(|c| (c.contact_id, c.clone()))
                    .collect();
                for contact in contacts {
                    follow_ups.push(backfill(ConversationKey::Direct(contact.contact_id)));
                }
            }
            ChatResponse::GroupsList { groups, .. } => {
                self.groups = groups
                    .iter()
                    .map(|g| {
                        (
                            g.group_id,
                            Group {
                                info: g.clone(),
                                members: Vec::new(),
                            },
                        )
                    })
                    .collect();
                for group in groups {
                    follow_ups.push(backfill(ConversationKey::Group(group.group_id)));
                    follow_ups.push(ChatCommand::ApiListMembers {
                        group_id: group.group_id,
                    });
                }
            }
            ChatResponse::GroupMembers { group, .. } => {
                let entry = self
                    .groups
                    .entry(group.group_info.group_id)
                    .or_insert_with(|| Group {
                        info: group.group_info.clone(),
                        members: Vec::new(),
                    });
                entry.members = group.members.clone();
            }
            ChatResponse::NewChatItems { chat_items, .. } => {
                for item in chat_items {
                    self.append_item(item);
                }
            }
            ChatResponse::ApiChat { chat, .. } => {
                self.apply_snapshot(chat);
            }
            ChatResponse::ApiChats { chats, .. } => {
                for chat in chats {
                    self.apply_snapshot(chat);
                }
            }
            ChatResponse::UserContactLink { contact_link, .. } => {
                self.contact_link = Some(contact_link.conn_req_contact.clone());
            }
            ChatResponse::UserContactLinkCreated {
                conn_req_contact, ..
            } => {
                self.contact_link = Some(conn_req_contact.clone());
            }
            ChatResponse::UserContactLinkDeleted { .. } => {
                self.contact_link = None;
            }
            ChatResponse::ContactConnected { contact, .. }
            | ChatResponse::AcceptingContactRequest { contact, .. } => {
                self.contacts.insert(contact.contact_id, contact.clone());
            }
            ChatResponse::ContactDeleted { contact, .. } => {
                // The one sanctioned local delete: the engine confirmed
                // the round trip.
                self.contacts.remove(&contact.contact_id);
                let key = ConversationKey::Direct(contact.contact_id);
                self.chats.remove(&key);
                self.pending_fetches.remove(&key);
                if self.selected_chat == Some(key) {
                    self.selected_chat = None;
                }
            }
            ChatResponse::ChatCmdError { chat_error, .. } => {
                // Propagated as data through the response channel; nothing
                // to fold.
                debug!("Command error: {}", chat_error.kind);
            }
            ChatResponse::ReceivedContactRequest { .. }
            | ChatResponse::Unknown => {}
        }
        follow_ups
    }

    /// Record that a backfill fetch for this key is in flight; pushes
    /// folded from now until the snapshot arrives survive the replace.
    pub fn note_fetch_started(&mut self, key: ConversationKey) {
        self.pending_fetches.insert(key, Vec::new());
    }

    pub fn chat(&self, key: &ConversationKey) -> Option<&Vec<ChatItem>> {
        self.chats.get(key)
    }

    fn append_item(&mut self, item: &AChatItem) {
        let Some(key) = ConversationKey::from_chat_info(&item.chat_info) else {
            return;
        };
        self.register_owner(&item.chat_info);
        self.chats
            .entry(key)
            .or_default()
            .push(item.chat_item.clone());
        if let Some(fence) = self.pending_fetches.get_mut(&key) {
            fence.push(item.chat_item.clone());
        }
    }

    // Snapshot-replace: the log becomes exactly the fetched window, plus
    // any fenced pushes the window does not already contain.
    fn apply_snapshot(&mut self, chat: &Chat) {
        let Some(key) = ConversationKey::from_chat_info(&chat.chat_info) else {
            return;
        };
        self.register_owner(&chat.chat_info);
        let mut log = chat.chat_items.clone();
        if let Some(pushed) = self.pending_fetches.remove(&key) {
            let known: HashSet<u64> = log.iter().map(|i| i.meta.item_id).collect();
            for item in pushed {
                if !known.contains(&item.meta.item_id) {
                    log.push(item);
                }
            }
        }
        self.chats.insert(key, log);
    }

    // First sighting of a contact or group registers it; registration is
    // idempotent and never overwrites an existing record.
    fn register_owner(&mut self, chat_info: &ChatInfo) {
        match chat_info {
            ChatInfo::Direct { contact } => {
                self.contacts
                    .entry(contact.contact_id)
                    .or_insert_with(|| contact.clone());
            }
            ChatInfo::Group { group_info } => {
                self.groups
                    .entry(group_info.group_id)
                    .or_insert_with(|| Group {
                        info: group_info.clone(),
                        members: Vec::new(),
                    });
            }
            ChatInfo::ContactRequest { .. } | ChatInfo::Unknown => {}
        }
    }
}

fn backfill(key: ConversationKey) -> ChatCommand {
    ChatCommand::ApiGetChat {
        chat_type: key.chat_type(),
        chat_id: key.chat_id(),
        pagination: ChatPagination::default(),
        search: None,
    }
}

/// Drives the reducer: subscribes to the client's full event stream,
/// folds every event in arrival order, transmits follow-up commands, and
/// exposes the read accessors the view layer consumes.
pub struct ChatStore {
    client: Arc<ChatClient>,
    state: Arc<TokioMutex<ChatState>>,
}

impl ChatStore {
    pub fn new(client: Arc<ChatClient>) -> Self {
        ChatStore {
            client,
            state: Arc::new(TokioMutex::new(ChatState::new())),
        }
    }

    /// Start the fold task. One task per store; events fold one at a
    /// time, so observable state order equals wire arrival order.
    pub async fn spawn(&self) -> JoinHandle<()> {
        let mut events = self.client.subscribe_all().await;
        let client = Arc::clone(&self.client);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(envelope) = events.recv().await {
                fold_event(&client, &state, &envelope).await;
            }
            debug!("Event stream ended, reducer stopping");
        })
    }

    /// Post-connect bootstrap. Later steps depend on ids the earlier
    /// responses produce, so each round trip completes before the next;
    /// backfills cascade from the listing folds.
    pub async fn bootstrap(&self) -> Result<(), ClientError> {
        let client = &self.client;

        // May answer with chatCmdError when the address already exists;
        // that is data, not a failure.
        let corr_id = client.api_create_address().await?;
        client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        let corr_id = client.api_list_users().await?;
        client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        let corr_id = client.api_list_groups().await?;
        client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        let corr_id = client.api_get_active_user().await?;
        let active = client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        let corr_id = client.api_set_auto_accept().await?;
        client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        let corr_id = client.api_show_address().await?;
        client
            .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
            .await?;

        if let Some(user) = active.as_active_user() {
            let corr_id = client.api_get_chats(user.user_id).await?;
            client
                .await_response_timeout(&corr_id, DEFAULT_COMMAND_TIMEOUT)
                .await?;
        }

        Ok(())
    }

    pub async fn active_user(&self) -> Option<User> {
        self.state.lock().await.active_user.clone()
    }

    pub async fn users(&self) -> Vec<UserInfo> {
        self.state.lock().await.users.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        let state = self.state.lock().await;
        let mut contacts: Vec<Contact> = state.contacts.values().cloned().collect();
        contacts.sort_by_key(|c| c.contact_id);
        contacts
    }

    pub async fn contact(&self, contact_id: u64) -> Option<Contact> {
        self.state.lock().await.contacts.get(&contact_id).cloned()
    }

    pub async fn groups(&self) -> Vec<Group> {
        let state = self.state.lock().await;
        let mut groups: Vec<Group> = state.groups.values().cloned().collect();
        groups.sort_by_key(|g| g.info.group_id);
        groups
    }

    pub async fn chat(&self, key: ConversationKey) -> Vec<ChatItem> {
        self.state
            .lock()
            .await
            .chats
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn contact_link(&self) -> Option<String> {
        self.state.lock().await.contact_link.clone()
    }

    pub async fn selected_chat(&self) -> Option<ConversationKey> {
        self.state.lock().await.selected_chat
    }

    pub async fn select_chat(&self, key: Option<ConversationKey>) {
        self.state.lock().await.selected_chat = key;
    }
}

// Fold one envelope: apply under the lock, register backfill fences for
// the fetches about to go out before releasing it, then transmit.
async fn fold_event(
    client: &ChatClient,
    state: &TokioMutex<ChatState>,
    envelope: &ServerEnvelope,
) {
    let follow_ups = {
        let mut state = state.lock().await;
        let follow_ups = state.apply(&envelope.resp);
        for cmd in &follow_ups {
            if let ChatCommand::ApiGetChat {
                chat_type, chat_id, ..
            } = cmd
            {
                if let Some(key) = ConversationKey::from_parts(*chat_type, *chat_id) {
                    state.note_fetch_started(key);
                }
            }
        }
        follow_ups
    };
    for cmd in follow_ups {
        if let Err(e) = client.send_command(&cmd).await {
            warn!("Failed to send follow-up command: {}", e);
        }
    }
}
