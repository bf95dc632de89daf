//! Highlight moments produced by the detector.
//!
//! Highlights are immutable once received: they are parsed from the
//! detector's `highlights` message and then only read by the clip cutter.
//! Times are seconds from the start of the source recording.

use serde::{Deserialize, Serialize};

/// A single detected highlight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    /// Start of the interesting moment (seconds).
    pub start_time: f64,

    /// End of the interesting moment (seconds).
    pub end_time: f64,

    /// Game/input events that contributed to this highlight.
    #[serde(default, alias = "inputs")]
    pub input_events: Vec<HighlightInput>,

    /// Detector confidence / ranking score.
    #[serde(default)]
    pub score: f64,

    /// Detector-specific metadata, passed through untouched.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One input event that fed into a highlight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightInput {
    /// Event type as named by the detector (e.g. "kill", "victory").
    #[serde(rename = "type")]
    pub kind: String,

    /// Event start (seconds).
    pub start_time: f64,

    /// Event end (seconds), when the event has extent.
    #[serde(default)]
    pub end_time: Option<f64>,

    /// Event-specific metadata.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Highlight {
    /// Create a highlight with no contributing events.
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            input_events: Vec::new(),
            score: 0.0,
            metadata: serde_json::Value::Null,
        }
    }

    /// Length of the highlight in seconds (never negative).
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }

    /// Distinct input types, in first-seen order.
    pub fn input_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for input in &self.input_events {
            if !types.contains(&input.kind.as_str()) {
                types.push(&input.kind);
            }
        }
        types
    }
}

/// Sort highlights chronologically by start time.
pub fn sort_by_start(highlights: &mut [Highlight]) {
    highlights.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
}
