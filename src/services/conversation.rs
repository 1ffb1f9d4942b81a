//! Bounded, expiring conversation history.
//!
//! Each conversation is stored as one JSON document under
//! `conversation:<id>` in an [`ExpiringStore`]. Every write re-reads the
//! current record, appends, trims to the configured history length and
//! persists with a fresh TTL. Reads treat records idle for longer than the
//! conversation timeout as gone and delete them on the way out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::core::error::{AppError, Result};
use crate::core::metrics::get_metrics;
use crate::services::store::ExpiringStore;

/// Key namespace for conversation records.
pub const CONVERSATION_KEY_PREFIX: &str = "conversation:";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::str::FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(AppError::BadRequest(format!("Unknown message role: {}", other))),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Persisted form of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl ConversationRecord {
    fn new(conversation_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }
}

/// Summary of a stored conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub is_expired: bool,
}

/// Manages per-conversation message history on top of an [`ExpiringStore`].
#[derive(Clone)]
pub struct ConversationStore {
    store: Arc<dyn ExpiringStore>,
    max_history: usize,
    timeout: Duration,
}

impl ConversationStore {
    /// Create a conversation store.
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence backend
    /// * `max_history` - Messages kept per conversation (at least 1)
    /// * `timeout` - Idle time after which a conversation expires
    pub fn new(store: Arc<dyn ExpiringStore>, max_history: usize, timeout: Duration) -> Self {
        Self {
            store,
            max_history: max_history.max(1),
            timeout,
        }
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Append a message, trimming history and resetting the TTL.
    ///
    /// Store failures come back as [`AppError::StoreUnavailable`]; callers
    /// should treat them as degraded service rather than a failed request.
    pub async fn add_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: impl Into<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<()> {
        let key = conversation_key(conversation_id);
        let now = Utc::now();

        let mut record = match self.load(&key).await {
            Ok(Some(record)) if !self.is_expired(&record, now) => record,
            Ok(_) => ConversationRecord::new(conversation_id, now),
            Err(err) => {
                self.record_store_error("add_message", conversation_id, &err);
                return Err(err);
            }
        };

        record.messages.push(Message {
            role,
            content: content.into(),
            timestamp: now,
            metadata,
        });

        if record.messages.len() > self.max_history {
            let excess = record.messages.len() - self.max_history;
            record.messages.drain(..excess);
        }
        record.updated_at = now;

        let data = serde_json::to_vec(&record)?;
        if let Err(err) = self.store.set_with_ttl(&key, data, self.timeout).await {
            self.record_store_error("add_message", conversation_id, &err);
            return Err(err);
        }

        tracing::debug!(
            conversation_id = %conversation_id,
            role = ?role,
            message_count = record.messages.len(),
            "Message added to conversation"
        );
        Ok(())
    }

    /// Messages of a conversation, oldest first.
    ///
    /// Returns an empty list when the conversation is absent, expired or the
    /// store cannot be read. Expired conversations are deleted.
    pub async fn get_conversation(&self, conversation_id: &str) -> Vec<Message> {
        let key = conversation_key(conversation_id);
        match self.load(&key).await {
            Ok(Some(record)) => {
                if self.is_expired(&record, Utc::now()) {
                    tracing::debug!(conversation_id = %conversation_id, "Conversation expired");
                    // deletion failures are already logged
                    let _ = self.delete_conversation(conversation_id).await;
                    Vec::new()
                } else {
                    record.messages
                }
            }
            Ok(None) => Vec::new(),
            Err(err) => {
                self.record_store_error("get_conversation", conversation_id, &err);
                Vec::new()
            }
        }
    }

    /// Creation/update times and size of a conversation, if stored.
    ///
    /// Store failures are logged and reported as absent. Use
    /// [`load_metadata`](Self::load_metadata) to tell the two apart.
    pub async fn get_metadata(&self, conversation_id: &str) -> Option<ConversationMetadata> {
        self.load_metadata(conversation_id).await.ok().flatten()
    }

    /// Like [`get_metadata`](Self::get_metadata), but store failures come
    /// back as [`AppError::StoreUnavailable`].
    pub async fn load_metadata(&self, conversation_id: &str) -> Result<Option<ConversationMetadata>> {
        let key = conversation_key(conversation_id);
        match self.load(&key).await {
            Ok(Some(record)) => Ok(Some(ConversationMetadata {
                created_at: record.created_at,
                updated_at: record.updated_at,
                message_count: record.messages.len(),
                is_expired: self.is_expired(&record, Utc::now()),
            })),
            Ok(None) => Ok(None),
            Err(err) => {
                self.record_store_error("get_metadata", conversation_id, &err);
                Err(err)
            }
        }
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.store
            .delete(&conversation_key(conversation_id))
            .await
            .inspect_err(|err| self.record_store_error("delete", conversation_id, err))
    }

    /// Ids of all conversations currently held by the store.
    pub async fn active_conversations(&self) -> Vec<String> {
        match self.store.keys_with_prefix(CONVERSATION_KEY_PREFIX).await {
            Ok(keys) => {
                let mut ids: Vec<String> = keys
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(CONVERSATION_KEY_PREFIX).map(String::from))
                    .collect();
                ids.sort();
                ids
            }
            Err(err) => {
                self.record_store_error("list", "*", &err);
                Vec::new()
            }
        }
    }

    fn is_expired(&self, record: &ConversationRecord, now: DateTime<Utc>) -> bool {
        match (now - record.updated_at).to_std() {
            Ok(idle) => idle > self.timeout,
            // updated_at in the future (clock skew)
            Err(_) => false,
        }
    }

    async fn load(&self, key: &str) -> Result<Option<ConversationRecord>> {
        let Some(data) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&data) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "Discarding unreadable conversation record");
                Ok(None)
            }
        }
    }

    fn record_store_error(&self, operation: &str, conversation_id: &str, err: &AppError) {
        tracing::warn!(
            operation = %operation,
            conversation_id = %conversation_id,
            error = %err,
            "Conversation store operation failed"
        );
        get_metrics()
            .conversation_store_errors
            .with_label_values(&[operation])
            .inc();
    }
}

fn conversation_key(conversation_id: &str) -> String {
    format!("{}{}", CONVERSATION_KEY_PREFIX, conversation_id)
}
