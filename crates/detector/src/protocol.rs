//! Framed JSON messages on the detector's stdout.
//!
//! The detector interleaves ordinary log lines with messages wrapped in a
//! literal start token and end token. Pipe reads do not respect message
//! boundaries, so [`MessageFramer`] accumulates bytes until a complete frame
//! is available.

use serde::{Deserialize, Serialize};

use highlighter_project_model::Highlight;

/// One decoded detector message, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DetectorMessage {
    /// Overall analysis progress.
    Progress { progress: f64 },

    /// Final result. Resolves the detection run.
    Highlights { highlights: Vec<Highlight> },

    /// A notable point in the recording (round start, match end, ...).
    Milestone(Milestone),
}

/// Free-form milestone payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Milestone {
    pub fn name(&self) -> Option<&str> {
        self.data.get("name").and_then(|v| v.as_str())
    }
}

/// Splits a byte stream into [`DetectorMessage`]s.
#[derive(Debug, Clone)]
pub struct MessageFramer {
    start: Vec<u8>,
    end: Vec<u8>,
    buffer: Vec<u8>,
}

impl MessageFramer {
    pub fn new(start_token: &str, end_token: &str) -> Self {
        Self {
            start: start_token.as_bytes().to_vec(),
            end: end_token.as_bytes().to_vec(),
            buffer: Vec::new(),
        }
    }

    /// Append a chunk and return every message it completed.
    ///
    /// Text outside a frame and frames that fail to parse are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<DetectorMessage> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();

        while let Some(end_at) = find(&self.buffer, &self.end, 0) {
            let frame = &self.buffer[..end_at];
            match rfind(frame, &self.start) {
                Some(start_at) => {
                    let payload = &frame[start_at + self.start.len()..];
                    match serde_json::from_slice::<DetectorMessage>(payload) {
                        Ok(message) => messages.push(message),
                        Err(err) => tracing::debug!(
                            error = %err,
                            payload = %String::from_utf8_lossy(payload),
                            "Ignoring malformed detector message"
                        ),
                    }
                }
                None => tracing::debug!("Ignoring end token without start token"),
            }
            self.buffer.drain(..end_at + self.end.len());
        }

        self.discard_log_text();
        messages
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything that can no longer become part of a frame: text before
    /// the last start token, or, without one, all but a possible token prefix.
    fn discard_log_text(&mut self) {
        let keep_from = match rfind(&self.buffer, &self.start) {
            Some(at) => at,
            None => self
                .buffer
                .len()
                .saturating_sub(self.start.len().saturating_sub(1)),
        };
        self.buffer.drain(..keep_from);
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| haystack[i..].starts_with(needle))
}
