//! Shared HTTP client for the inference server.
//!
//! One keep-alive pool is reused by the embedding and completion clients so
//! requests don't pay connection setup each time.

use std::time::Duration;

use crate::config::RelayConfig;
use crate::types::{RelayError, Result};

pub fn build_client(config: &RelayConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Attach the bearer token when one is configured
pub(crate) fn authorize(
    request: reqwest::RequestBuilder,
    api_key: Option<&str>,
) -> reqwest::RequestBuilder {
    match api_key {
        Some(key) => request.bearer_auth(key),
        None => request,
    }
}
