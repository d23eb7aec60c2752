//! Server-sent event frames from a streamed chat completion.
//!
//! Each event is a line `data: <json>`; the stream ends with `data: [DONE]`.
//! Chunks from the network may split lines (or UTF-8 sequences) anywhere, so
//! the decoder buffers bytes until it sees a newline.

use serde::Deserialize;
use tracing::trace;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Non-empty text fragment
    Token(String),
    /// Terminator; nothing after it is decoded
    Done,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode one line. Non-data lines, unparsable payloads and frames without a
/// fragment yield `None`.
pub fn parse_line(line: &str) -> Option<Frame> {
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix(DATA_PREFIX)?;

    if data == DONE_SENTINEL {
        return Some(Frame::Done);
    }

    let chunk: StreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            trace!("Skipping malformed stream frame: {}", e);
            return None;
        }
    };

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|text| !text.is_empty())
        .map(Frame::Token)
}

/// Incremental line splitter over raw body chunks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminator has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed a chunk, returning every complete frame it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.take_line(&line, &mut frames) {
                break;
            }
        }

        frames
    }

    /// Decode whatever is left once the body ends without a trailing newline
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.take_line(&line, &mut frames);
        }
        self.finished = true;
        frames
    }

    /// Returns true when the line was the terminator
    fn take_line(&mut self, line: &[u8], frames: &mut Vec<Frame>) -> bool {
        match parse_line(&String::from_utf8_lossy(line)) {
            Some(Frame::Done) => {
                frames.push(Frame::Done);
                self.finished = true;
                self.buffer.clear();
                true
            }
            Some(frame) => {
                frames.push(frame);
                false
            }
            None => false,
        }
    }
}
