// Inbound wire shapes for Parley
// Every message from the engine decodes into a ServerEnvelope; the resp
// field is the tagged union the dispatcher and reducer branch on

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::commands::{AutoAccept, GroupMemberRole, GroupProfile};

/// One inbound message. `corr_id` is present when the message answers a
/// command this client sent; absent on unsolicited pushes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "corrId", default, skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<String>,
    pub resp: ChatResponse,
}

/// Tagged union of response and push payloads. The engine's vocabulary
/// grows over time; unrecognized tags land in `Unknown` and still flow
/// through the wildcard channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatResponse {
    #[serde(rename_all = "camelCase")]
    ActiveUser { user: User },
    #[serde(rename_all = "camelCase")]
    UsersList { users: Vec<UserInfo> },
    #[serde(rename_all = "camelCase")]
    ContactsList {
        #[serde(default)]
        user: Option<User>,
        contacts: Vec<Contact>,
    },
    #[serde(rename_all = "camelCase")]
    GroupsList {
        #[serde(default)]
        user: Option<User>,
        groups: Vec<GroupInfo>,
    },
    #[serde(rename_all = "camelCase")]
    GroupMembers {
        #[serde(default)]
        user: Option<User>,
        group: GroupWithMembers,
    },
    #[serde(rename_all = "camelCase")]
    NewChatItems {
        #[serde(default)]
        user: Option<User>,
        chat_items: Vec<AChatItem>,
    },
    #[serde(rename_all = "camelCase")]
    ApiChats {
        #[serde(default)]
        user: Option<User>,
        chats: Vec<Chat>,
    },
    #[serde(rename_all = "camelCase")]
    ApiChat {
        #[serde(default)]
        user: Option<User>,
        chat: Chat,
    },
    #[serde(rename_all = "camelCase")]
    UserContactLink {
        #[serde(default)]
        user: Option<User>,
        contact_link: UserAddress,
    },
    #[serde(rename_all = "camelCase")]
    UserContactLinkCreated {
        #[serde(default)]
        user: Option<User>,
        #[serde(rename = "connReqContact")]
        conn_req_contact: String,
    },
    #[serde(rename_all = "camelCase")]
    UserContactLinkDeleted {
        #[serde(default)]
        user: Option<User>,
    },
    #[serde(rename_all = "camelCase")]
    ReceivedContactRequest {
        #[serde(default)]
        user: Option<User>,
        contact_request: UserContactRequest,
    },
    #[serde(rename_all = "camelCase")]
    AcceptingContactRequest {
        #[serde(default)]
        user: Option<User>,
        contact: Contact,
    },
    #[serde(rename_all = "camelCase")]
    ContactConnected {
        #[serde(default)]
        user: Option<User>,
        contact: Contact,
    },
    #[serde(rename_all = "camelCase")]
    ContactDeleted {
        #[serde(default)]
        user: Option<User>,
        contact: Contact,
    },
    #[serde(rename_all = "camelCase")]
    ChatCmdError {
        #[serde(rename = "user_", default)]
        user: Option<User>,
        chat_error: ChatError,
    },
    #[serde(other)]
    Unknown,
}

impl ChatResponse {
    /// The wire discriminant, used as the subscription filter key.
    pub fn tag(&self) -> &'static str {
        match self {
            ChatResponse::ActiveUser { .. } => "activeUser",
            ChatResponse::UsersList { .. } => "usersList",
            ChatResponse::ContactsList { .. } => "contactsList",
            ChatResponse::GroupsList { .. } => "groupsList",
            ChatResponse::GroupMembers { .. } => "groupMembers",
            ChatResponse::NewChatItems { .. } => "newChatItems",
            ChatResponse::ApiChats { .. } => "apiChats",
            ChatResponse::ApiChat { .. } => "apiChat",
            ChatResponse::UserContactLink { .. } => "userContactLink",
            ChatResponse::UserContactLinkCreated { .. } => "userContactLinkCreated",
            ChatResponse::UserContactLinkDeleted { .. } => "userContactLinkDeleted",
            ChatResponse::ReceivedContactRequest { .. } => "receivedContactRequest",
            ChatResponse::AcceptingContactRequest { .. } => "acceptingContactRequest",
            ChatResponse::ContactConnected { .. } => "contactConnected",
            ChatResponse::ContactDeleted { .. } => "contactDeleted",
            ChatResponse::ChatCmdError { .. } => "chatCmdError",
            ChatResponse::Unknown => "unknown",
        }
    }

    pub fn as_active_user(&self) -> Option<&User> {
        match self {
            ChatResponse::ActiveUser { user } => Some(user),
            _ => None,
        }
    }

    pub fn as_contact_link(&self) -> Option<&str> {
        match self {
            ChatResponse::UserContactLink { contact_link, .. } => {
                Some(&contact_link.conn_req_contact)
            }
            ChatResponse::UserContactLinkCreated {
                conn_req_contact, ..
            } => Some(conn_req_contact),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ChatResponse::ChatCmdError { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<u64>,
    pub display_name: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_link: Option<String>,
    #[serde(default)]
    pub local_alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: u64,
    pub local_display_name: String,
    pub profile: LocalProfile,
    #[serde(default)]
    pub active_user: bool,
}

// usersList entry: a user plus its unread tally
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user: User,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub contact_id: u64,
    pub local_display_name: String,
    pub profile: LocalProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContactRequest {
    pub contact_request_id: u64,
    pub local_display_name: String,
    pub profile: LocalProfile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    #[serde(rename = "connReqContact")]
    pub conn_req_contact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_accept: Option<AutoAccept>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_id: u64,
    pub local_display_name: String,
    pub group_profile: GroupProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub group_member_id: u64,
    #[serde(default)]
    pub member_id: String,
    pub member_role: GroupMemberRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWithMembers {
    pub group_info: GroupInfo,
    pub members: Vec<GroupMember>,
}

/// One conversation snapshot: who it is with plus the fetched item window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub chat_info: ChatInfo,
    pub chat_items: Vec<ChatItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AChatItem {
    pub chat_info: ChatInfo,
    pub chat_item: ChatItem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatInfo {
    #[serde(rename_all = "camelCase")]
    Direct { contact: Contact },
    #[serde(rename_all = "camelCase")]
    Group { group_info: GroupInfo },
    #[serde(rename = "contactRequest", rename_all = "camelCase")]
    ContactRequest { contact_request: UserContactRequest },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatItem {
    pub chat_dir: CIDirection,
    pub meta: CIMeta,
    pub content: CIContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CIDirection {
    #[serde(rename = "type")]
    pub direction: DirectionType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirectionType {
    DirectSnd,
    DirectRcv,
    GroupSnd,
    GroupRcv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CIMeta {
    pub item_id: u64,
    pub item_ts: DateTime<Utc>,
    #[serde(default)]
    pub item_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CIContent {
    #[serde(rename_all = "camelCase")]
    SndMsgContent { msg_content: MsgContent },
    #[serde(rename_all = "camelCase")]
    RcvMsgContent { msg_content: MsgContent },
    #[serde(other)]
    Unknown,
}

impl CIContent {
    /// Plain text of a message item, if it carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            CIContent::SndMsgContent { msg_content } | CIContent::RcvMsgContent { msg_content } => {
                msg_content.as_text()
            }
            CIContent::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MsgContent {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Link { text: String, preview: LinkPreview },
    #[serde(rename_all = "camelCase")]
    Image { image: String },
    #[serde(rename_all = "camelCase")]
    File { text: String },
    #[serde(other)]
    Unknown,
}

impl MsgContent {
    pub fn text(text: impl Into<String>) -> Self {
        MsgContent::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MsgContent::Text { text } | MsgContent::Link { text, .. } | MsgContent::File { text } => {
                Some(text)
            }
            MsgContent::Image { .. } | MsgContent::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreview {
    pub uri: String,
    pub title: String,
    pub description: String,
    pub image: String,
}

/// A well-formed error answer to a command. Delivered as data through the
/// response channel, never as an Err; callers branch on `kind` and dig
/// into `details` for the engine's category/subcategory fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatError {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}
