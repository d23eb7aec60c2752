//! ============================================================================
//! Qdrant Index - Qdrant vector database operations
//! ============================================================================
//! Points are keyed by turn UUID and carry
//! `{anonymousId, role, content, timestamp}` as payload, the layout earlier
//! relay deployments already wrote to `chat_memory`.
//! ============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance, FieldType,
    Filter, PointStruct, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::{debug, info, warn};

use super::store::VectorIndex;
use super::types::{RecalledTurn, SimilarityQuery, Turn};
use crate::types::{RelayError, Result};

/// Payload key holding the caller identity; also the search filter key
pub const IDENTITY_FIELD: &str = "anonymousId";
pub const ROLE_FIELD: &str = "role";
pub const CONTENT_FIELD: &str = "content";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Vector index backed by a Qdrant collection
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantIndex {
    /// Create a client for `url`. No request is made until first use.
    pub fn connect(url: &str, collection: &str) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| RelayError::VectorStore(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    async fn create_index(&self, field: &str, field_type: FieldType) -> Result<()> {
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                field,
                field_type,
            ))
            .await
            .map_err(|e| {
                RelayError::VectorStore(format!("Failed to index payload field {}: {}", field, e))
            })?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn collection_exists(&self) -> Result<bool> {
        self.client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| {
                RelayError::VectorStore(format!("Failed to check collection existence: {}", e))
            })
    }

    async fn create_collection(&self, vector_size: u64) -> Result<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
            )
            .await
            .map_err(|e| RelayError::VectorStore(format!("Failed to create collection: {}", e)))?;

        self.create_index(IDENTITY_FIELD, FieldType::Keyword).await?;
        self.create_index(ROLE_FIELD, FieldType::Keyword).await?;
        self.create_index(TIMESTAMP_FIELD, FieldType::Integer).await?;

        info!("Collection {} created with payload indexes", self.collection);
        Ok(())
    }

    async fn upsert(&self, turn: &Turn) -> Result<()> {
        let point = PointStruct::new(
            turn.id.to_string(),
            turn.embedding.clone(),
            turn_payload(turn),
        );

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| RelayError::VectorStore(format!("Failed to upsert turn: {}", e)))?;

        Ok(())
    }

    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RecalledTurn>> {
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query.vector.clone(), query.limit)
                    .filter(identity_filter(&query.identity))
                    .score_threshold(query.score_threshold)
                    .with_payload(true),
            )
            .await
            .map_err(|e| RelayError::VectorStore(format!("Failed to search turns: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(recalled_from_point)
            .collect())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.health_check().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Qdrant health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

fn turn_payload(turn: &Turn) -> HashMap<String, Value> {
    [
        (IDENTITY_FIELD.to_string(), Value::from(turn.identity.clone())),
        (ROLE_FIELD.to_string(), Value::from(turn.role.to_string())),
        (CONTENT_FIELD.to_string(), Value::from(turn.content.clone())),
        (TIMESTAMP_FIELD.to_string(), Value::from(turn.created_at)),
    ]
    .into_iter()
    .collect()
}

/// Only points owned by `identity` are candidates
fn identity_filter(identity: &str) -> Filter {
    Filter::must([Condition::matches(IDENTITY_FIELD, identity.to_string())])
}

/// Points without a readable role or content are dropped
fn recalled_from_point(point: ScoredPoint) -> Option<RecalledTurn> {
    let payload = point.payload;
    Some(RecalledTurn {
        role: get_string(&payload, ROLE_FIELD)?.parse().ok()?,
        content: get_string(&payload, CONTENT_FIELD)?,
        score: point.score,
    })
}

fn get_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}
