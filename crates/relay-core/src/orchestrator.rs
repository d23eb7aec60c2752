//! ============================================================================
//! Conversation Orchestrator - Recall, generate, remember
//! ============================================================================
//! Runs one exchange per call:
//!
//! ```text
//! ReceivedInput → HistoryLoaded → ReplyProduced → Persisted → Completed
//!        └──────────────┴───────────────┴────────────┴──→ Errored
//! ```
//!
//! History retrieval always precedes generation. Both turns are written only
//! after the whole reply is known, user turn first. A failed assistant write
//! leaves the user turn in place.
//! ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecallSettings;
use crate::llm::{ChatModel, StreamEvent};
use crate::memory::{MemoryStore, RecalledTurn, Turn};
use crate::types::{ChatInput, ChatMessage, RelayError, Result, ValidChat};

/// Stage of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ReceivedInput,
    HistoryLoaded,
    ReplyProduced,
    Persisted,
    Completed,
    Errored,
}

/// Event delivered to a streaming caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyEvent {
    Token(String),
    /// Both turns are persisted
    Done,
}

/// Tracks and logs phase transitions for one exchange
struct Exchange<'a> {
    identity: &'a str,
    phase: Phase,
}

impl<'a> Exchange<'a> {
    fn start(identity: &'a str) -> Self {
        debug!("Exchange for {} entered {:?}", identity, Phase::ReceivedInput);
        Self {
            identity,
            phase: Phase::ReceivedInput,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug!("Exchange for {}: {:?} -> {:?}", self.identity, self.phase, next);
        self.phase = next;
    }

    fn fail(&mut self, error: &RelayError) {
        warn!(
            "Exchange for {} failed during {:?}: {}",
            self.identity, self.phase, error
        );
        self.phase = Phase::Errored;
    }
}

/// Drives recall, generation and persistence for chat requests
pub struct Orchestrator {
    memory: Arc<MemoryStore>,
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    recall: RecallSettings,
}

impl Orchestrator {
    pub fn new(
        memory: Arc<MemoryStore>,
        model: Arc<dyn ChatModel>,
        system_prompt: impl Into<String>,
        recall: RecallSettings,
    ) -> Self {
        Self {
            memory,
            model,
            system_prompt: system_prompt.into(),
            recall,
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// System instruction, then recalled turns in rank order, then the new message
    pub fn build_prompt(&self, history: &[RecalledTurn], message: &str) -> Vec<ChatMessage> {
        let mut prompt = Vec::with_capacity(history.len() + 2);
        prompt.push(ChatMessage::system(self.system_prompt.clone()));
        prompt.extend(history.iter().map(ChatMessage::from));
        prompt.push(ChatMessage::user(message));
        prompt
    }

    /// Request/response exchange. Returns the assistant reply.
    pub async fn reply(&self, input: ChatInput) -> Result<String> {
        let chat = input.validate()?;
        let mut exchange = Exchange::start(&chat.identity);

        let result = self.run_reply(&chat, &mut exchange).await;
        if let Err(e) = &result {
            exchange.fail(e);
        }
        result
    }

    /// Streaming exchange. Tokens go to `events` as they arrive, followed by
    /// `ReplyEvent::Done` once both turns are saved. Returns the full reply.
    ///
    /// If `cancel` fires or `events` is closed before the reply is complete,
    /// generation is abandoned and nothing is persisted.
    pub async fn stream_reply(
        &self,
        input: ChatInput,
        events: mpsc::Sender<ReplyEvent>,
        cancel: CancellationToken,
    ) -> Result<String> {
        let chat = input.validate()?;
        let mut exchange = Exchange::start(&chat.identity);

        let result = self
            .run_stream(&chat, &mut exchange, &events, &cancel)
            .await;
        match &result {
            Ok(_) => {
                let _ = events.send(ReplyEvent::Done).await;
            }
            Err(RelayError::Cancelled) => {
                info!("Streaming exchange for {} cancelled", chat.identity);
                exchange.advance(Phase::Errored);
            }
            Err(e) => exchange.fail(e),
        }
        result
    }

    async fn run_reply(&self, chat: &ValidChat, exchange: &mut Exchange<'_>) -> Result<String> {
        let prompt = self.load_prompt(chat).await?;
        exchange.advance(Phase::HistoryLoaded);

        let reply = self.model.complete(&prompt).await?;
        exchange.advance(Phase::ReplyProduced);

        self.persist_exchange(chat, &reply).await?;
        exchange.advance(Phase::Persisted);

        exchange.advance(Phase::Completed);
        Ok(reply)
    }

    async fn run_stream(
        &self,
        chat: &ValidChat,
        exchange: &mut Exchange<'_>,
        events: &mpsc::Sender<ReplyEvent>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let prompt = self.load_prompt(chat).await?;
        exchange.advance(Phase::HistoryLoaded);

        let mut stream = self.model.stream(&prompt, cancel.clone()).await?;
        let mut full_reply = String::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                event = stream.recv() => event,
            };

            match event {
                Some(StreamEvent::Delta { text }) => {
                    full_reply.push_str(&text);
                    if events.send(ReplyEvent::Token(text)).await.is_err() {
                        cancel.cancel();
                        return Err(RelayError::Cancelled);
                    }
                }
                Some(StreamEvent::Done) => break,
                Some(StreamEvent::Error { message }) => {
                    return Err(RelayError::Generation(message));
                }
                None if cancel.is_cancelled() => return Err(RelayError::Cancelled),
                None => {
                    return Err(RelayError::Generation(
                        "Stream closed before completion".to_string(),
                    ));
                }
            }
        }
        exchange.advance(Phase::ReplyProduced);

        self.persist_exchange(chat, &full_reply).await?;
        exchange.advance(Phase::Persisted);

        exchange.advance(Phase::Completed);
        Ok(full_reply)
    }

    async fn load_prompt(&self, chat: &ValidChat) -> Result<Vec<ChatMessage>> {
        let history = self
            .memory
            .search(
                &chat.identity,
                &chat.message,
                self.recall.limit,
                self.recall.score_threshold,
            )
            .await?;
        Ok(self.build_prompt(&history, &chat.message))
    }

    /// Sequential writes: user turn, then assistant turn
    async fn persist_exchange(&self, chat: &ValidChat, reply: &str) -> Result<()> {
        let user_turn = self
            .memory
            .save(Turn::user(chat.identity.clone(), chat.message.clone()))
            .await?;

        if let Err(e) = self
            .memory
            .save(Turn::assistant(chat.identity.clone(), reply))
            .await
        {
            warn!(
                "User turn {} for {} saved without its assistant reply",
                user_turn.id, chat.identity
            );
            return Err(e);
        }

        Ok(())
    }
}
