//! ============================================================================
//! Embedding Service - Vector embeddings for semantic memory search
//! ============================================================================
//! Generates text embeddings through the inference server's OpenAI-compatible
//! `/embeddings` endpoint. One text per call, no retry, no fallback model.
//! ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RelayConfig;
use crate::http::authorize;
use crate::types::{RelayError, Result};

/// Turns text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Embedding service backed by an OpenAI-compatible server
pub struct EmbeddingService {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl EmbeddingService {
    /// Create an embedding service sharing the given connection pool
    pub fn new(client: Client, config: &RelayConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.inference_base_url.clone(),
            model: config.embedding_model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Embedding {} chars with {}", text.len(), self.model);

        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = authorize(
            self.client.post(format!("{}/embeddings", self.base_url)),
            self.api_key.as_deref(),
        )
        .timeout(self.timeout)
        .json(&request)
        .send()
        .await
        .map_err(|e| RelayError::Embedding(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Embedding(format!("Failed to read response body: {}", e)))?;

        parse_embedding_body(status, &body)
    }
}

fn parse_embedding_body(status: StatusCode, body: &str) -> Result<Vec<f32>> {
    if !status.is_success() {
        if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
            return Err(RelayError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error.error.message
            )));
        }
        return Err(RelayError::Embedding(format!(
            "Embedding API error ({}): {}",
            status, body
        )));
    }

    let parsed: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        RelayError::MalformedResponse(format!("Failed to parse embedding response: {}", e))
    })?;

    if let Some(usage) = &parsed.usage {
        debug!("Embedding tokens used: {}", usage.total_tokens);
    }

    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| RelayError::MalformedResponse("No embedding returned".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uses_configured_model() {
        let config = RelayConfig::default();
        let service = EmbeddingService::new(Client::new(), &config);
        assert_eq!(service.base_url, "http://localhost:8080/v1");
        assert_eq!(service.model, "qwen3-embedding-0.6b");
        assert!(service.api_key.is_none());
    }

    #[test]
    fn test_request_sends_single_input() {
        let request = EmbeddingRequest {
            model: "m",
            input: "hello",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"model": "m", "input": "hello"}));
    }

    #[test]
    fn test_parse_takes_first_embedding() {
        let body = r#"{"data":[{"embedding":[0.1,0.2],"index":0},{"embedding":[9.0],"index":1}],
                       "usage":{"prompt_tokens":1,"total_tokens":1}}"#;
        let vector = parse_embedding_body(StatusCode::OK, body).unwrap();
        assert_eq!(vector, vec![0.1, 0.2]);
    }

    #[test]
    fn test_parse_surfaces_api_error_message() {
        let body = r#"{"error":{"message":"model not loaded","type":"server_error"}}"#;
        let err = parse_embedding_body(StatusCode::INTERNAL_SERVER_ERROR, body).unwrap_err();
        assert!(matches!(err, RelayError::Embedding(_)));
        assert!(err.to_string().contains("model not loaded"));
    }

    #[test]
    fn test_parse_rejects_empty_data() {
        let err = parse_embedding_body(StatusCode::OK, r#"{"data":[]}"#).unwrap_err();
        assert!(matches!(err, RelayError::MalformedResponse(_)));

        let err = parse_embedding_body(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, RelayError::MalformedResponse(_)));
    }
}
