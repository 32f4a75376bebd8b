use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Chat transcript
// =============================================================================

/// Who authored a transcript message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The person typing in the chat box.
    #[default]
    User,
    /// The other side of the conversation (the assistant).
    Other,
}

impl Sender {
    /// The sender on the other side of the conversation.
    pub fn opposite(self) -> Self {
        match self {
            Sender::User => Sender::Other,
            Sender::Other => Sender::User,
        }
    }
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Other => write!(f, "other"),
        }
    }
}

/// A single chat bubble. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with a fresh id and the current time.
    pub fn new(content: impl Into<String>, sender: Sender) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Retrieval
// =============================================================================

/// A passage returned by the retrieval service, with its relevance score.
///
/// Consumed once to build the prompt context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievedPassage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            node_id: None,
            metadata: HashMap::new(),
        }
    }
}

// =============================================================================
// Chat endpoint wire types
// =============================================================================

/// Body of `POST /api`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub query: String,
}

/// The generated reply inside a [`ChatResponse`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub content: String,
}

/// Response of `POST /api`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: ChatReply,
}

impl ChatResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            message: ChatReply {
                content: content.into(),
            },
        }
    }
}
