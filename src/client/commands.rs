// Chat command vocabulary for Parley
// Contains the closed set of engine commands and their wire-text encoding

use serde::{Deserialize, Serialize};

use super::response::MsgContent;

pub type ChatItemId = u64;

/// Outbound wire envelope: one command per frame, joined to its response
/// by the correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub corr_id: Option<String>,
    pub cmd: String,
}

/// Conversation kind, rendered as the sigil prefixing a chat id on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatType {
    Direct,
    Group,
    ContactRequest,
}

impl ChatType {
    pub fn symbol(&self) -> &'static str {
        match self {
            ChatType::Direct => "@",
            ChatType::Group => "#",
            ChatType::ContactRequest => "<@",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupProfile {
    pub display_name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

// JSON argument of /_create user
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewUser<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<&'a Profile>,
    same_servers: bool,
    past_timestamp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_item_id: Option<ChatItemId>,
    pub msg_content: MsgContent,
}

impl ComposedMessage {
    pub fn text(text: impl Into<String>) -> Self {
        ComposedMessage {
            file_path: None,
            quoted_item_id: None,
            msg_content: MsgContent::text(text),
        }
    }
}

/// Window selector for chat fetches. Count is always last so the rendered
/// argument order is stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatPagination {
    Last { count: usize },
    After { after: ChatItemId, count: usize },
    Before { before: ChatItemId, count: usize },
}

impl Default for ChatPagination {
    fn default() -> Self {
        ChatPagination::Last { count: 100 }
    }
}

impl ChatPagination {
    fn render(&self) -> String {
        match self {
            ChatPagination::Last { count } => format!(" count={}", count),
            ChatPagination::After { after, count } => format!(" after={} count={}", after, count),
            ChatPagination::Before { before, count } => {
                format!(" before={} count={}", before, count)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRange {
    pub from_item: ChatItemId,
    pub to_item: ChatItemId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    #[serde(rename = "broadcast")]
    Broadcast,
    #[serde(rename = "internal")]
    Internal,
}

impl DeleteMode {
    fn token(&self) -> &'static str {
        match self {
            DeleteMode::Broadcast => "broadcast",
            DeleteMode::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupMemberRole {
    #[serde(rename = "member")]
    Member,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "owner")]
    Owner,
}

impl GroupMemberRole {
    fn token(&self) -> &'static str {
        match self {
            GroupMemberRole::Member => "member",
            GroupMemberRole::Admin => "admin",
            GroupMemberRole::Owner => "owner",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAccept {
    pub accept_incognito: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_reply: Option<MsgContent>,
}

/// The closed set of commands this client can issue. Encoding a command is
/// pure and total; adding an engine operation means adding a variant here
/// plus its arm in `command_text`.
#[derive(Debug, Clone)]
pub enum ChatCommand {
    ShowActiveUser,
    CreateActiveUser {
        profile: Option<Profile>,
        same_servers: bool,
        past_timestamp: bool,
    },
    ListUsers,
    ApiSetActiveUser {
        user_id: u64,
        view_pwd: Option<String>,
    },
    ApiDeleteUser {
        user_id: u64,
        del_smp_queues: bool,
        view_pwd: Option<String>,
    },
    StartChat {
        subscribe_connections: bool,
        enable_expire_chat_items: bool,
    },
    ApiStopChat,
    ApiGetChats {
        user_id: u64,
    },
    ApiGetChat {
        chat_type: ChatType,
        chat_id: u64,
        pagination: ChatPagination,
        search: Option<String>,
    },
    ApiSendMessage {
        chat_type: ChatType,
        chat_id: u64,
        messages: Vec<ComposedMessage>,
    },
    ApiUpdateChatItem {
        chat_type: ChatType,
        chat_id: u64,
        chat_item_id: ChatItemId,
        msg_content: MsgContent,
    },
    ApiDeleteChatItem {
        chat_type: ChatType,
        chat_id: u64,
        chat_item_id: ChatItemId,
        delete_mode: DeleteMode,
    },
    ApiChatRead {
        chat_type: ChatType,
        chat_id: u64,
        item_range: Option<ItemRange>,
    },
    ApiDeleteChat {
        chat_type: ChatType,
        chat_id: u64,
    },
    ApiClearChat {
        chat_type: ChatType,
        chat_id: u64,
    },
    ApiAcceptContact {
        contact_req_id: u64,
    },
    ApiRejectContact {
        contact_req_id: u64,
    },
    ApiDeleteContact {
        contact_id: u64,
    },
    ApiSetContactAlias {
        contact_id: u64,
        local_alias: String,
    },
    ListContacts,
    ListGroups,
    NewGroup {
        group_profile: GroupProfile,
    },
    ApiAddMember {
        group_id: u64,
        contact_id: u64,
        member_role: GroupMemberRole,
    },
    ApiJoinGroup {
        group_id: u64,
    },
    ApiRemoveMember {
        group_id: u64,
        member_id: u64,
    },
    ApiLeaveGroup {
        group_id: u64,
    },
    ApiListMembers {
        group_id: u64,
    },
    AddContact,
    Connect {
        conn_req: String,
    },
    CreateMyAddress,
    DeleteMyAddress,
    ShowMyAddress,
    AddressAutoAccept {
        auto_accept: Option<AutoAccept>,
    },
}

impl ChatCommand {
    /// Base verb on the wire. Some verbs are shared between variants that
    /// the engine disambiguates by argument shape.
    pub fn verb(&self) -> &'static str {
        match self {
            ChatCommand::ShowActiveUser => "/u",
            ChatCommand::CreateActiveUser { .. } => "/_create user",
            ChatCommand::ListUsers => "/users",
            ChatCommand::ApiSetActiveUser { .. } => "/_user",
            ChatCommand::ApiDeleteUser { .. } => "/_delete user",
            ChatCommand::StartChat { .. } => "/_start",
            ChatCommand::ApiStopChat => "/_stop",
            ChatCommand::ApiGetChats { .. } => "/_get chats",
            ChatCommand::ApiGetChat { .. } => "/_get chat",
            ChatCommand::ApiSendMessage { .. } => "/_send",
            ChatCommand::ApiUpdateChatItem { .. } => "/_update item",
            ChatCommand::ApiDeleteChatItem { .. } => "/_delete item",
            ChatCommand::ApiChatRead { .. } => "/_read chat",
            ChatCommand::ApiDeleteChat { .. } => "/_delete",
            ChatCommand::ApiClearChat { .. } => "/_clear chat",
            ChatCommand::ApiAcceptContact { .. } => "/_accept",
            ChatCommand::ApiRejectContact { .. } => "/_reject",
            ChatCommand::ApiDeleteContact { .. } => "/_delete",
            ChatCommand::ApiSetContactAlias { .. } => "/_set alias",
            ChatCommand::ListContacts => "/contacts",
            ChatCommand::ListGroups => "/groups",
            ChatCommand::NewGroup { .. } => "/_group",
            ChatCommand::ApiAddMember { .. } => "/_add",
            ChatCommand::ApiJoinGroup { .. } => "/_join",
            ChatCommand::ApiRemoveMember { .. } => "/_remove",
            ChatCommand::ApiLeaveGroup { .. } => "/_leave",
            ChatCommand::ApiListMembers { .. } => "/_members",
            ChatCommand::AddContact => "/connect",
            ChatCommand::Connect { .. } => "/connect",
            ChatCommand::CreateMyAddress => "/address",
            ChatCommand::DeleteMyAddress => "/delete_address",
            ChatCommand::ShowMyAddress => "/show_address",
            ChatCommand::AddressAutoAccept { .. } => "/auto_accept",
        }
    }

    /// Render the full wire line for this command. Same value in, same
    /// string out, for every variant.
    pub fn command_text(&self) -> String {
        let verb = self.verb();
        match self {
            ChatCommand::ShowActiveUser
            | ChatCommand::ListUsers
            | ChatCommand::ApiStopChat
            | ChatCommand::ListContacts
            | ChatCommand::ListGroups
            | ChatCommand::AddContact
            | ChatCommand::CreateMyAddress
            | ChatCommand::DeleteMyAddress
            | ChatCommand::ShowMyAddress => verb.to_string(),
            ChatCommand::CreateActiveUser {
                profile,
                same_servers,
                past_timestamp,
            } => {
                let user = NewUser {
                    profile: profile.as_ref(),
                    same_servers: *same_servers,
                    past_timestamp: *past_timestamp,
                };
                format!("{} {}", verb, json(&user))
            }
            ChatCommand::ApiSetActiveUser { user_id, view_pwd } => {
                format!("{} {}{}", verb, user_id, maybe_json(view_pwd))
            }
            ChatCommand::ApiDeleteUser {
                user_id,
                del_smp_queues,
                view_pwd,
            } => format!(
                "{} {} del_smp={}{}",
                verb,
                user_id,
                on_off(*del_smp_queues),
                maybe_json(view_pwd)
            ),
            ChatCommand::StartChat {
                subscribe_connections,
                enable_expire_chat_items,
            } => format!(
                "{} subscribe={} expire={}",
                verb,
                on_off(*subscribe_connections),
                on_off(*enable_expire_chat_items)
            ),
            ChatCommand::ApiGetChats { user_id } => format!("{} {}", verb, user_id),
            ChatCommand::ApiGetChat {
                chat_type,
                chat_id,
                pagination,
                search,
            } => format!(
                "{} {}{}{}{}",
                verb,
                chat_type.symbol(),
                chat_id,
                pagination.render(),
                maybe_kv("search", search)
            ),
            ChatCommand::ApiSendMessage {
                chat_type,
                chat_id,
                messages,
            } => format!(
                "{} {}{} json {}",
                verb,
                chat_type.symbol(),
                chat_id,
                json(messages)
            ),
            ChatCommand::ApiUpdateChatItem {
                chat_type,
                chat_id,
                chat_item_id,
                msg_content,
            } => format!(
                "{} {}{} {} json {}",
                verb,
                chat_type.symbol(),
                chat_id,
                chat_item_id,
                json(msg_content)
            ),
            ChatCommand::ApiDeleteChatItem {
                chat_type,
                chat_id,
                chat_item_id,
                delete_mode,
            } => format!(
                "{} {}{} {} {}",
                verb,
                chat_type.symbol(),
                chat_id,
                chat_item_id,
                delete_mode.token()
            ),
            ChatCommand::ApiChatRead {
                chat_type,
                chat_id,
                item_range,
            } => {
                let range = match item_range {
                    Some(r) => format!(" from={} to={}", r.from_item, r.to_item),
                    None => String::new(),
                };
                format!("{} {}{}{}", verb, chat_type.symbol(), chat_id, range)
            }
            ChatCommand::ApiDeleteChat { chat_type, chat_id }
            | ChatCommand::ApiClearChat { chat_type, chat_id } => {
                format!("{} {}{}", verb, chat_type.symbol(), chat_id)
            }
            ChatCommand::ApiAcceptContact { contact_req_id }
            | ChatCommand::ApiRejectContact { contact_req_id } => {
                format!("{} {}", verb, contact_req_id)
            }
            ChatCommand::ApiDeleteContact { contact_id } => format!("{} @{}", verb, contact_id),
            ChatCommand::ApiSetContactAlias {
                contact_id,
                local_alias,
            } => format!("{} @{} {}", verb, contact_id, local_alias.trim()),
            ChatCommand::NewGroup { group_profile } => format!("{} {}", verb, json(group_profile)),
            ChatCommand::ApiAddMember {
                group_id,
                contact_id,
                member_role,
            } => format!(
                "{} #{} {} {}",
                verb,
                group_id,
                contact_id,
                member_role.token()
            ),
            ChatCommand::ApiJoinGroup { group_id }
            | ChatCommand::ApiLeaveGroup { group_id }
            | ChatCommand::ApiListMembers { group_id } => format!("{} #{}", verb, group_id),
            ChatCommand::ApiRemoveMember {
                group_id,
                member_id,
            } => format!("{} #{} {}", verb, group_id, member_id),
            ChatCommand::Connect { conn_req } => format!("{} {}", verb, conn_req),
            ChatCommand::AddressAutoAccept { auto_accept } => {
                format!("{} {}", verb, auto_accept_str(auto_accept))
            }
        }
    }
}

// Serialization of command argument shapes cannot fail; they contain no
// non-string map keys or fallible serializers.
fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn maybe_json<T: Serialize>(value: &Option<T>) -> String {
    match value {
        Some(v) => format!(" json {}", json(v)),
        None => String::new(),
    }
}

fn maybe_kv(key: &str, value: &Option<String>) -> String {
    match value {
        Some(v) => format!(" {}={}", key, v),
        None => String::new(),
    }
}

fn auto_accept_str(auto_accept: &Option<AutoAccept>) -> String {
    match auto_accept {
        None => "off".to_string(),
        Some(aa) => {
            let mut out = String::from("on");
            if aa.accept_incognito {
                out.push_str(" incognito=on");
            }
            if let Some(reply) = &aa.auto_reply {
                out.push_str(" json ");
                out.push_str(&json(reply));
            }
            out
        }
    }
}
