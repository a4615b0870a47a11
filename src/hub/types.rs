use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type ConversationId = u64;
pub type AccountId = u64;

/// Identity of one physical connection
pub type ConnectionId = Uuid;

/// Fan-out destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKey {
    AdminNotifications,
    AdminConversations,
    TechnicianNotifications,
    ChatRoom(ConversationId),
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdminNotifications => write!(f, "admin/notifications"),
            Self::AdminConversations => write!(f, "admin/conversations"),
            Self::TechnicianNotifications => write!(f, "technician/notifications"),
            Self::ChatRoom(id) => write!(f, "chat/{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Technician,
    User,
}

/// A verified caller, as returned by an [`Authenticator`](crate::hub::auth::Authenticator)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub account_id: AccountId,
    pub role: Role,
}

/// The four inbound connection entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    AdminNotifications,
    AdminConversations,
    TechnicianNotifications,
    Chat,
}

impl EntryPoint {
    /// Role-scoped topic served by this entry point (`None` for chat)
    pub fn topic(&self) -> Option<TopicKey> {
        match self {
            Self::AdminNotifications => Some(TopicKey::AdminNotifications),
            Self::AdminConversations => Some(TopicKey::AdminConversations),
            Self::TechnicianNotifications => Some(TopicKey::TechnicianNotifications),
            Self::Chat => None,
        }
    }

    pub fn allows(&self, role: Role) -> bool {
        match self {
            Self::AdminNotifications | Self::AdminConversations => role == Role::Admin,
            Self::TechnicianNotifications => role == Role::Technician,
            Self::Chat => true,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.topic() {
            Some(topic) => write!(f, "{}", topic),
            None => write!(f, "chat"),
        }
    }
}

/// Domain event produced by application code ("car registered", "payment received", ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub account_id: AccountId,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: Value,
}

impl Notification {
    pub fn new(account_id: AccountId, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            account_id,
            title: title.into(),
            body: body.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Conversation activity announced to administrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub conversation_id: ConversationId,
    pub account_id: AccountId,
    pub content: String,
}
