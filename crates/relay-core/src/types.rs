//! ============================================================================
//! Core Types for the Chat Relay
//! ============================================================================
//! Roles, prompt messages, inbound chat input, and the relay error type.
//! Prompt messages are serialized straight into OpenAI-compatible requests.
//! ============================================================================

use serde::{Deserialize, Serialize};

/// Speaker of a turn or prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// One element of the prompt sent to the chat model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Raw chat input as received from a caller. Either field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatInput {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "anonymousId")]
    pub identity: Option<String>,
}

/// Chat input that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidChat {
    pub identity: String,
    pub message: String,
}

impl ChatInput {
    pub fn new(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            identity: Some(identity.into()),
        }
    }

    /// Empty strings count as missing.
    pub fn validate(self) -> Result<ValidChat> {
        match (self.message, self.identity) {
            (Some(message), Some(identity)) if !message.is_empty() && !identity.is_empty() => {
                Ok(ValidChat { identity, message })
            }
            _ => Err(RelayError::InvalidInput(
                "Missing message or anonymousId".to_string(),
            )),
        }
    }
}

/// Error types for the relay
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Embedding request failed: {0}")]
    Embedding(String),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Generation request failed: {0}")]
    Generation(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RelayError {
    /// Errors caused by the caller rather than an upstream service
    pub fn is_client_error(&self) -> bool {
        matches!(self, RelayError::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
