//! ============================================================================
//! Relay Configuration
//! ============================================================================
//! All endpoints, model identifiers and retrieval knobs live here. Defaults
//! match a stock LocalAI + Qdrant setup on localhost; each field can be
//! overridden from the environment (a `.env` file is loaded by the binary).
//! ============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{RelayError, Result};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_INFERENCE_URL: &str = "http://localhost:8080/v1";
pub const DEFAULT_CHAT_MODEL: &str = "meta-llama-3.1-8b-instruct";
pub const DEFAULT_EMBEDDING_MODEL: &str = "qwen3-embedding-0.6b";
/// qdrant-client speaks gRPC, which Qdrant serves on 6334
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";
pub const DEFAULT_COLLECTION: &str = "chat_memory";
/// Output width of the default embedding model
pub const DEFAULT_VECTOR_SIZE: u64 = 1024;
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Answer briefly and clearly.";

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub inference_base_url: String,
    /// Bearer token for the inference server, if it requires one
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub embedding_model: String,
    pub qdrant_url: String,
    pub collection: String,
    pub vector_size: u64,
    pub history_limit: u64,
    pub score_threshold: f32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub system_prompt: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            inference_base_url: DEFAULT_INFERENCE_URL.to_string(),
            api_key: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            qdrant_url: DEFAULT_QDRANT_URL.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            vector_size: DEFAULT_VECTOR_SIZE,
            history_limit: 5,
            score_threshold: 0.75,
            temperature: 0.6,
            max_tokens: 300,
            request_timeout_secs: 120,
            pool_max_idle_per_host: 32,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl RelayConfig {
    /// Build from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };

        Ok(Self {
            bind_addr: text("RELAY_BIND", defaults.bind_addr),
            inference_base_url: text("LOCALAI_BASE_URL", defaults.inference_base_url)
                .trim_end_matches('/')
                .to_string(),
            api_key: lookup("LOCALAI_API_KEY").filter(|k| !k.trim().is_empty()),
            chat_model: text("CHAT_MODEL", defaults.chat_model),
            embedding_model: text("EMBEDDING_MODEL", defaults.embedding_model),
            qdrant_url: text("QDRANT_URL", defaults.qdrant_url),
            collection: text("QDRANT_COLLECTION", defaults.collection),
            vector_size: parse_var(&lookup, "EMBEDDING_DIM", defaults.vector_size)?,
            history_limit: parse_var(&lookup, "HISTORY_LIMIT", defaults.history_limit)?,
            score_threshold: parse_var(&lookup, "SCORE_THRESHOLD", defaults.score_threshold)?,
            temperature: parse_var(&lookup, "CHAT_TEMPERATURE", defaults.temperature)?,
            max_tokens: parse_var(&lookup, "CHAT_MAX_TOKENS", defaults.max_tokens)?,
            request_timeout_secs: parse_var(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            pool_max_idle_per_host: parse_var(
                &lookup,
                "HTTP_POOL_SIZE",
                defaults.pool_max_idle_per_host,
            )?,
            system_prompt: text("SYSTEM_PROMPT", defaults.system_prompt),
        })
    }

    /// Retrieval knobs used by the orchestrator
    pub fn recall_settings(&self) -> RecallSettings {
        RecallSettings {
            limit: self.history_limit,
            score_threshold: self.score_threshold,
        }
    }
}

/// How much history to pull into a prompt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecallSettings {
    pub limit: u64,
    pub score_threshold: f32,
}

impl Default for RecallSettings {
    fn default() -> Self {
        RelayConfig::default().recall_settings()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| RelayError::Config(format!("{}={:?}: {}", key, raw, e))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = RelayConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.collection, "chat_memory");
        assert_eq!(config.vector_size, 1024);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.score_threshold, 0.75);
        assert_eq!(config.max_tokens, 300);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_overrides_from_lookup() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("LOCALAI_BASE_URL", "http://gpu-box:8080/v1/"),
            ("SCORE_THRESHOLD", "0.5"),
            ("HISTORY_LIMIT", "8"),
            ("LOCALAI_API_KEY", "  "),
        ]))
        .unwrap();

        assert_eq!(config.inference_base_url, "http://gpu-box:8080/v1");
        assert_eq!(config.score_threshold, 0.5);
        assert_eq!(config.history_limit, 8);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_unparsable_number_is_config_error() {
        let err = RelayConfig::from_lookup(lookup_from(&[("EMBEDDING_DIM", "wide")])).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("EMBEDDING_DIM"));
    }
}
