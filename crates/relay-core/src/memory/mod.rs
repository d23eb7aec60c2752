//! ============================================================================
//! Memory Module - Persistent conversation memory for the relay
//! ============================================================================
//! Provides vector-based turn storage using Qdrant for semantic search.
//!
//! ## Features
//! - Store every user and assistant turn with its own embedding
//! - Semantic search for relevant prior turns
//! - Per-identity isolation enforced by the index query filter
//!
//! ## Architecture
//! ```text
//! User Message → Embed → Filtered Vector Search → Relevant Turns
//!                                                      ↓
//!                        [System Prompt] + [Turns] + [User Message]
//!                                                      ↓
//!                                              Chat Completion
//!                                                      ↓
//!                              Embed & Store User Turn, Assistant Turn
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use relay_core::memory::{EmbeddingService, MemoryStore, QdrantIndex};
//!
//! let index = Arc::new(QdrantIndex::connect("http://localhost:6334", "chat_memory")?);
//! let embeddings = Arc::new(EmbeddingService::new(client, &config));
//! let store = MemoryStore::new(index, embeddings, 1024);
//! store.ensure_collection().await?;
//!
//! store.save(Turn::user("u1", "My name is Alice")).await?;
//! let relevant = store.search("u1", "what is my name", 5, 0.75).await?;
//! ```
//! ============================================================================

mod embeddings;
mod qdrant;
mod store;
mod types;

// Re-export public types
pub use embeddings::{Embedder, EmbeddingService};
pub use qdrant::QdrantIndex;
pub use store::{MemoryStore, VectorIndex};
pub use types::{RecalledTurn, SimilarityQuery, Turn};
