use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{ErrorCode, HubError, Result};
use crate::hub::types::{AccountId, ConversationId, Notification};

/// Who a stored notification was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Admin,
    Technician,
}

/// Persisted form of a dispatched notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub account_id: AccountId,
    pub audience: Audience,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub created_at_ms: u64,
}

impl NotificationRecord {
    pub fn from_notification(notification: &Notification, audience: Audience) -> Self {
        let created_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            account_id: notification.account_id,
            audience,
            title: notification.title.clone(),
            body: notification.body.clone(),
            data: notification.data.clone(),
            created_at_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: AccountId,
    pub content: String,
}

/// Persistence collaborator.
///
/// Calls are synchronous and may be made from any task.
pub trait Store: Send + Sync {
    fn create_notification(&self, record: &NotificationRecord) -> Result<()>;
    fn create_message(&self, conversation_id: ConversationId, sender: AccountId, content: &str) -> Result<()>;
    fn create_conversation(&self) -> Result<ConversationId>;
}

#[derive(Debug)]
struct Conversation {
    status: ConversationStatus,
    messages: Vec<StoredMessage>,
}

#[derive(Debug, Default)]
struct MemoryState {
    last_conversation_id: ConversationId,
    conversations: HashMap<ConversationId, Conversation>,
    notifications: Vec<NotificationRecord>,
}

/// Process-local store used by the server binary and the tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks a conversation inactive. There is no way back to active.
    pub fn close_conversation(&self, conversation_id: ConversationId) -> Result<()> {
        let mut state = self.state();
        let conversation = state.conversations.get_mut(&conversation_id).ok_or_else(|| {
            HubError::new(ErrorCode::ConversationNotFound, format!("Conversation {} not found", conversation_id))
        })?;

        conversation.status = ConversationStatus::Inactive;
        info!("Conversation {} closed", conversation_id);
        Ok(())
    }

    pub fn conversation_status(&self, conversation_id: ConversationId) -> Option<ConversationStatus> {
        self.state().conversations.get(&conversation_id).map(|c| c.status)
    }

    pub fn messages(&self, conversation_id: ConversationId) -> Vec<StoredMessage> {
        self.state()
            .conversations
            .get(&conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.state().notifications.clone()
    }
}

impl Store for MemoryStore {
    fn create_notification(&self, record: &NotificationRecord) -> Result<()> {
        let mut state = self.state();
        state.notifications.push(record.clone());
        debug!("Stored notification #{} for account {}", state.notifications.len(), record.account_id);
        Ok(())
    }

    fn create_message(&self, conversation_id: ConversationId, sender: AccountId, content: &str) -> Result<()> {
        let mut state = self.state();
        let conversation = state.conversations.get_mut(&conversation_id).ok_or_else(|| {
            HubError::new(ErrorCode::ConversationNotFound, format!("Conversation {} not found", conversation_id))
        })?;

        if conversation.status == ConversationStatus::Inactive {
            return Err(HubError::new(
                ErrorCode::ConversationInactive,
                format!("Conversation {} is inactive", conversation_id),
            ));
        }

        conversation.messages.push(StoredMessage {
            sender,
            content: content.to_string(),
        });
        Ok(())
    }

    fn create_conversation(&self) -> Result<ConversationId> {
        let mut state = self.state();
        state.last_conversation_id += 1;
        let id = state.last_conversation_id;
        state.conversations.insert(
            id,
            Conversation {
                status: ConversationStatus::Active,
                messages: Vec::new(),
            },
        );
        info!("Conversation {} created", id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversations_get_increasing_ids_and_keep_message_order() {
        let store = MemoryStore::new();
        let first = store.create_conversation().unwrap();
        let second = store.create_conversation().unwrap();
        assert!(second > first);

        store.create_message(first, 3, "one").unwrap();
        store.create_message(first, 4, "two").unwrap();
        let contents: Vec<_> = store.messages(first).into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert!(store.messages(second).is_empty());
    }

    #[test]
    fn closed_conversations_refuse_messages() {
        let store = MemoryStore::new();
        let id = store.create_conversation().unwrap();
        assert_eq!(store.conversation_status(id), Some(ConversationStatus::Active));

        store.close_conversation(id).unwrap();
        assert_eq!(store.conversation_status(id), Some(ConversationStatus::Inactive));
        let err = store.create_message(id, 1, "late").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ConversationInactive));

        let missing = store.create_message(99, 1, "x").unwrap_err();
        assert_eq!(missing.code(), Some(ErrorCode::ConversationNotFound));
    }
}
