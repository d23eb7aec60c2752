//! ============================================================================
//! Memory Store - Turn persistence and identity-scoped recall
//! ============================================================================
//! Combines an embedder with a vector index. Every write embeds the turn's own
//! content; every read is filtered by identity inside the index query.
//!
//! Concurrent writers are not coordinated here. The index must accept
//! concurrent upserts of distinct points (Qdrant does).
//! ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::embeddings::Embedder;
use super::types::{RecalledTurn, SimilarityQuery, Turn};
use crate::types::{RelayError, Result};

/// Similarity index holding conversation turns
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn collection_exists(&self) -> Result<bool>;

    /// Create the collection with cosine distance and the given vector width
    async fn create_collection(&self, vector_size: u64) -> Result<()>;

    /// Write one point for the turn
    async fn upsert(&self, turn: &Turn) -> Result<()>;

    /// Nearest neighbours restricted to `query.identity`, best match first
    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RecalledTurn>>;

    async fn health_check(&self) -> Result<bool>;
}

/// Memory store combining a vector index and an embedder
pub struct MemoryStore {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    vector_size: u64,
}

impl MemoryStore {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, vector_size: u64) -> Self {
        Self {
            index,
            embedder,
            vector_size,
        }
    }

    /// Create the collection if it is missing. Returns true when it was created.
    pub async fn ensure_collection(&self) -> Result<bool> {
        if self.index.collection_exists().await? {
            debug!("Memory collection already exists");
            return Ok(false);
        }

        info!("Creating memory collection ({} dims, cosine)", self.vector_size);
        self.index.create_collection(self.vector_size).await?;
        Ok(true)
    }

    /// Persist a turn, embedding its content first if needed
    pub async fn save(&self, mut turn: Turn) -> Result<Turn> {
        if turn.embedding.is_empty() {
            turn.embedding = self.embedder.embed(&turn.content).await?;
        }

        if turn.embedding.len() as u64 != self.vector_size {
            return Err(RelayError::MalformedResponse(format!(
                "Embedding has {} dims, collection expects {}",
                turn.embedding.len(),
                self.vector_size
            )));
        }

        self.index.upsert(&turn).await?;

        debug!(
            "Stored {} turn {} for identity {}",
            turn.role, turn.id, turn.identity
        );
        Ok(turn)
    }

    /// Turns from `identity` similar to `query_text`, most similar first
    pub async fn search(
        &self,
        identity: &str,
        query_text: &str,
        limit: u64,
        score_threshold: f32,
    ) -> Result<Vec<RecalledTurn>> {
        debug!(
            "Searching history for identity {} (limit: {}, threshold: {})",
            identity, limit, score_threshold
        );

        let vector = self.embedder.embed(query_text).await?;
        let query = SimilarityQuery {
            identity: identity.to_string(),
            vector,
            limit,
            score_threshold,
        };

        let recalled = self.index.search(&query).await?;
        debug!("Recalled {} turns for identity {}", recalled.len(), identity);
        Ok(recalled)
    }

    /// Check if the underlying index is reachable
    pub async fn health_check(&self) -> Result<bool> {
        self.index.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{InMemoryIndex, KeywordEmbedder, TEST_DIM};
    use crate::types::Role;

    fn store() -> (MemoryStore, Arc<InMemoryIndex>, Arc<KeywordEmbedder>) {
        let index = Arc::new(InMemoryIndex::new());
        let embedder = Arc::new(KeywordEmbedder::new());
        let store = MemoryStore::new(index.clone(), embedder.clone(), TEST_DIM as u64);
        (store, index, embedder)
    }

    #[tokio::test]
    async fn test_ensure_collection_creates_once() {
        let (store, index, _) = store();

        assert!(store.ensure_collection().await.unwrap());
        assert!(!store.ensure_collection().await.unwrap());
        assert!(!store.ensure_collection().await.unwrap());

        assert_eq!(index.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_save_embeds_own_content() {
        let (store, index, embedder) = store();

        let saved = store.save(Turn::user("u1", "rust traits")).await.unwrap();

        assert_eq!(embedder.calls(), vec!["rust traits".to_string()]);
        assert_eq!(saved.embedding.len(), TEST_DIM);
        assert_eq!(index.points().len(), 1);
        assert_eq!(index.points()[0].id, saved.id);
    }

    #[tokio::test]
    async fn test_save_keeps_precomputed_embedding() {
        let (store, _, embedder) = store();

        let turn = Turn::assistant("u1", "hi").with_embedding(vec![1.0; TEST_DIM]);
        store.save(turn).await.unwrap();

        assert!(embedder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_wrong_dimension() {
        let (store, index, _) = store();

        let turn = Turn::user("u1", "hi").with_embedding(vec![1.0; 3]);
        let err = store.save(turn).await.unwrap_err();

        assert!(matches!(err, RelayError::MalformedResponse(_)));
        assert!(index.points().is_empty());
    }

    #[tokio::test]
    async fn test_search_never_crosses_identity() {
        let (store, _, _) = store();
        store.save(Turn::user("alice", "rust borrow checker")).await.unwrap();
        store.save(Turn::user("bob", "rust borrow checker")).await.unwrap();
        store.save(Turn::assistant("bob", "rust lifetimes")).await.unwrap();

        let results = store.search("alice", "rust borrow checker", 10, 0.0).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].role, Role::User);
    }

    #[tokio::test]
    async fn test_search_orders_by_score_and_applies_threshold() {
        let (store, _, _) = store();
        store.save(Turn::user("u1", "rust borrow checker")).await.unwrap();
        store.save(Turn::user("u1", "rust cooking")).await.unwrap();
        store.save(Turn::user("u1", "gardening tips")).await.unwrap();

        let results = store.search("u1", "rust borrow checker", 10, 0.3).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "rust borrow checker");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| r.score >= 0.3));
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let (store, _, _) = store();
        for i in 0..4 {
            store.save(Turn::user("u1", format!("rust note {}", i))).await.unwrap();
        }

        let results = store.search("u1", "rust note", 2, 0.0).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_search_empty_history_is_not_an_error() {
        let (store, _, _) = store();
        let results = store.search("nobody", "anything", 5, 0.75).await.unwrap();
        assert!(results.is_empty());
    }
}
