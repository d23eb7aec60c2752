//! ============================================================================
//! LLM Module - Text generation against the local inference server
//! ============================================================================
//! - CompletionClient: OpenAI-compatible `/chat/completions`, batch or streamed
//! - frames: `data:` line decoding for streamed replies
//! ============================================================================

mod completion;
pub mod frames;

pub use completion::{pump_frames, ChatModel, CompletionClient, StreamEvent};
