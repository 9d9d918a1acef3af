//! Thread messages: the persisted log a run operates over.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ThreadId;

/// Persisted message type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    Tool,
    System,
}

/// One persisted message in a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub thread_id: ThreadId,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn new(thread_id: ThreadId, message_type: MessageType, content: serde_json::Value) -> Self {
        Self {
            thread_id,
            message_type,
            content,
            created_at: Utc::now(),
        }
    }

    /// Whether this message already answers the thread: if the most
    /// recent message is an assistant message, the run has nothing
    /// left to do.
    pub fn is_assistant(&self) -> bool {
        self.message_type == MessageType::Assistant
    }
}
