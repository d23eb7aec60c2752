//! Recording fakes for the embedder, index and model seams.
//!
//! Available to this crate's tests and, through the `test-util` feature, to
//! other workspace crates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatModel, StreamEvent};
use crate::memory::{Embedder, RecalledTurn, SimilarityQuery, Turn, VectorIndex};
use crate::types::{ChatMessage, RelayError, Result};

/// Vector width produced by [`KeywordEmbedder`]
pub const TEST_DIM: usize = 32;

/// Bag-of-words embedder. Each distinct lowercase word gets its own axis, so
/// texts sharing words are similar and texts sharing none score zero.
#[derive(Default)]
pub struct KeywordEmbedder {
    vocabulary: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts embedded so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.lock().unwrap().push(text.to_string());

        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut vector = vec![0.0; TEST_DIM];
        for word in text.split_whitespace().map(str::to_lowercase) {
            let next = vocabulary.len();
            let axis = *vocabulary.entry(word).or_insert(next) % TEST_DIM;
            vector[axis] += 1.0;
        }
        Ok(vector)
    }
}

/// In-process cosine index with call recording
#[derive(Default)]
pub struct InMemoryIndex {
    exists: Mutex<bool>,
    create_calls: AtomicUsize,
    points: Mutex<Vec<Turn>>,
    searches: Mutex<Vec<SimilarityQuery>>,
    upserts_allowed: Mutex<Option<usize>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the collection already present
    pub fn existing() -> Self {
        let index = Self::default();
        *index.exists.lock().unwrap() = true;
        index
    }

    /// Fail every upsert after the first `n`
    pub fn fail_upserts_after(&self, n: usize) {
        *self.upserts_allowed.lock().unwrap() = Some(n);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Stored points in write order
    pub fn points(&self) -> Vec<Turn> {
        self.points.lock().unwrap().clone()
    }

    pub fn searches(&self) -> Vec<SimilarityQuery> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn collection_exists(&self) -> Result<bool> {
        Ok(*self.exists.lock().unwrap())
    }

    async fn create_collection(&self, _vector_size: u64) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        *self.exists.lock().unwrap() = true;
        Ok(())
    }

    async fn upsert(&self, turn: &Turn) -> Result<()> {
        let mut points = self.points.lock().unwrap();
        if let Some(allowed) = *self.upserts_allowed.lock().unwrap() {
            if points.len() >= allowed {
                return Err(RelayError::VectorStore("upsert rejected".to_string()));
            }
        }
        points.push(turn.clone());
        Ok(())
    }

    async fn search(&self, query: &SimilarityQuery) -> Result<Vec<RecalledTurn>> {
        self.searches.lock().unwrap().push(query.clone());

        let mut scored: Vec<RecalledTurn> = self
            .points
            .lock()
            .unwrap()
            .iter()
            .filter(|turn| turn.identity == query.identity)
            .map(|turn| RecalledTurn {
                role: turn.role,
                content: turn.content.clone(),
                score: cosine(&turn.embedding, &query.vector),
            })
            .filter(|recalled| recalled.score >= query.score_threshold)
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(query.limit as usize);
        Ok(scored)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// How a [`ScriptedModel`] behaves
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply with these fragments (joined for batch calls)
    Reply(Vec<String>),
    /// Fail the call outright
    Fail(String),
    /// Stream these fragments, then report a transport error
    BreakAfter(Vec<String>, String),
    /// Stream these fragments, then stay open until cancelled
    HangAfter(Vec<String>),
}

/// Chat model that follows a script and records every prompt
pub struct ScriptedModel {
    script: Script,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `text` in one piece
    pub fn replying(text: &str) -> Self {
        Self::new(Script::Reply(vec![text.to_string()]))
    }

    /// Stream `fragments` in order
    pub fn streaming(fragments: &[&str]) -> Self {
        Self::new(Script::Reply(
            fragments.iter().map(|f| f.to_string()).collect(),
        ))
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.script {
            Script::Reply(fragments) => Ok(fragments.concat()),
            Script::Fail(message) | Script::BreakAfter(_, message) => {
                Err(RelayError::Generation(message.clone()))
            }
            Script::HangAfter(fragments) => Ok(fragments.concat()),
        }
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.prompts.lock().unwrap().push(messages.to_vec());

        let (fragments, ending) = match &self.script {
            Script::Fail(message) => return Err(RelayError::Generation(message.clone())),
            Script::Reply(fragments) => (fragments.clone(), Some(StreamEvent::Done)),
            Script::BreakAfter(fragments, message) => (
                fragments.clone(),
                Some(StreamEvent::Error {
                    message: message.clone(),
                }),
            ),
            Script::HangAfter(fragments) => (fragments.clone(), None),
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for text in fragments {
                if tx.send(StreamEvent::Delta { text }).await.is_err() {
                    return;
                }
            }
            match ending {
                Some(event) => {
                    let _ = tx.send(event).await;
                }
                None => cancel.cancelled().await,
            }
        });
        Ok(rx)
    }
}
