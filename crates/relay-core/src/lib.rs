//! ============================================================================
//! RELAY-CORE: Memory-augmented chat relay
//! ============================================================================
//! This crate handles all backend logic for the chat relay:
//! - Turn storage and identity-scoped similarity search via Qdrant
//! - Embeddings and chat completions via an OpenAI-compatible server
//! - Streamed completion decoding with cancellation
//! - Orchestration of recall → generate → remember per request
//! ============================================================================

pub mod config;
pub mod http;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export main types for convenience
pub use config::{RecallSettings, RelayConfig};
pub use llm::{ChatModel, CompletionClient, StreamEvent};
pub use memory::{EmbeddingService, MemoryStore, QdrantIndex, Turn};
pub use orchestrator::{Orchestrator, Phase, ReplyEvent};
pub use types::*;
