//! ============================================================================
//! Memory Types - Conversation turns as stored in the vector index
//! ============================================================================

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessage, Role};

/// A single utterance stored in the vector database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique identifier, assigned when the turn is created
    pub id: Uuid,
    /// Caller-supplied conversation identity
    pub identity: String,
    pub role: Role,
    pub content: String,
    /// Vector embedding of `content` (not serialized when empty)
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    /// Unix timestamp in milliseconds
    pub created_at: i64,
}

impl Turn {
    pub fn new(identity: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity: identity.into(),
            role,
            content: content.into(),
            embedding: Vec::new(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn user(identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(identity, Role::User, content)
    }

    pub fn assistant(identity: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(identity, Role::Assistant, content)
    }

    /// Attach a pre-computed embedding
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// A turn returned by similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecalledTurn {
    pub role: Role,
    pub content: String,
    pub score: f32,
}

impl From<&RecalledTurn> for ChatMessage {
    fn from(turn: &RecalledTurn) -> Self {
        ChatMessage::new(turn.role, turn.content.clone())
    }
}

/// Identity-scoped nearest-neighbour query against the index
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub identity: String,
    pub vector: Vec<f32>,
    pub limit: u64,
    pub score_threshold: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_creation() {
        let turn = Turn::user("u1", "hello");
        assert_eq!(turn.identity, "u1");
        assert_eq!(turn.role, Role::User);
        assert!(turn.embedding.is_empty());
        assert!(turn.created_at > 0);
    }

    #[test]
    fn test_turn_ids_are_unique() {
        assert_ne!(Turn::user("u1", "a").id, Turn::user("u1", "a").id);
    }

    #[test]
    fn test_recalled_turn_to_message() {
        let recalled = RecalledTurn {
            role: Role::Assistant,
            content: "earlier answer".into(),
            score: 0.9,
        };
        let message = ChatMessage::from(&recalled);
        assert_eq!(message, ChatMessage::assistant("earlier answer"));
    }
}
