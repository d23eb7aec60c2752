//! ============================================================================
//! Completion Client - Chat completions via an OpenAI-compatible server
//! ============================================================================
//! Batch calls return the first choice's text. Streamed calls hand back a
//! channel fed by a reader task that decodes `data:` frames as they arrive.
//! ============================================================================

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::frames::{Frame, FrameDecoder};
use crate::config::RelayConfig;
use crate::http::authorize;
use crate::types::{ChatMessage, RelayError, Result};

/// Capacity of the token channel handed to callers
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// An event from a streamed completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text output
    Delta { text: String },
    /// The model finished (sentinel seen or body ended)
    Done,
    /// Transport failure mid-stream
    Error { message: String },
}

/// Text generation backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a full reply in one call
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Generate a reply incrementally. The channel yields deltas and then
    /// exactly one `Done` or `Error`, unless `cancel` fires first.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}

/// Chat completion client for the inference server
pub struct CompletionClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl CompletionClient {
    /// Create a completion client sharing the given connection pool
    pub fn new(client: Client, config: &RelayConfig) -> Self {
        Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.inference_base_url.clone(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for CompletionClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!("Requesting completion ({} messages)", messages.len());

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
            stream: false,
        };

        let response = authorize(self.client.post(self.endpoint()), self.api_key.as_deref())
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::Generation(format!("Failed to call chat API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Generation(format!(
                "Chat API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            RelayError::MalformedResponse(format!("Failed to parse chat response: {}", e))
        })?;

        first_choice_text(chat_response)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        debug!("Requesting streamed completion ({} messages)", messages.len());

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: None,
            stream: true,
        };

        let http_request = authorize(self.client.post(self.endpoint()), self.api_key.as_deref())
            .header("accept", "text/event-stream")
            .json(&request);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            response = http_request.send() => response
                .map_err(|e| RelayError::Generation(format!("Failed to call chat API: {}", e)))?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Generation(format!(
                "Chat API error {}: {}",
                status, body
            )));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(pump_frames(response.bytes_stream(), tx, cancel));
        Ok(rx)
    }
}

/// Decode a streamed body into events until the sentinel, end of body,
/// cancellation, or the receiver going away.
pub async fn pump_frames<S, B, E>(
    body: S,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Completion stream cancelled");
                return;
            }
            next = body.next() => next,
        };

        let frames = match next {
            Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
            Some(Err(e)) => {
                warn!("Completion stream failed: {}", e);
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
            None => {
                let mut frames = decoder.finish();
                frames.push(Frame::Done);
                frames
            }
        };

        for frame in frames {
            match frame {
                Frame::Token(text) => {
                    if tx.send(StreamEvent::Delta { text }).await.is_err() {
                        return;
                    }
                }
                Frame::Done => {
                    let _ = tx.send(StreamEvent::Done).await;
                    return;
                }
            }
        }
    }
}

fn first_choice_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RelayError::MalformedResponse("No choices in chat response".to_string()))
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}
