//! Error types shared across Highlighter crates.

use std::path::PathBuf;

/// Top-level error type for Highlighter operations.
///
/// `Canceled` is an outcome rather than a failure: callers should test
/// [`HighlighterError::is_canceled`] before reporting an error to the user.
#[derive(Debug, thiserror::Error)]
pub enum HighlighterError {
    #[error("Error reading frames from {}", path.display())]
    FrameRead { path: PathBuf },

    #[error("Error writing frames: {message}")]
    FrameWrite { message: String },

    #[error("Error reading audio from {}", path.display())]
    AudioRead { path: PathBuf },

    #[error("Error mixing audio: {message}")]
    AudioMix { message: String },

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Detector process failed (exit code {exit_code:?}, signal {signal:?})")]
    DetectorProcess {
        exit_code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Operation canceled")]
    Canceled,

    #[error("An export is already in progress")]
    ExportInProgress,

    #[error("Probe error: {message}")]
    Probe { message: String },

    #[error("Transcoder error: {message}")]
    Transcoder { message: String },

    #[error("Update error: {message}")]
    Update { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using HighlighterError.
pub type HighlighterResult<T> = Result<T, HighlighterError>;

impl HighlighterError {
    pub fn frame_read(path: impl Into<PathBuf>) -> Self {
        Self::FrameRead { path: path.into() }
    }

    pub fn frame_write(msg: impl Into<String>) -> Self {
        Self::FrameWrite {
            message: msg.into(),
        }
    }

    pub fn audio_read(path: impl Into<PathBuf>) -> Self {
        Self::AudioRead { path: path.into() }
    }

    pub fn audio_mix(msg: impl Into<String>) -> Self {
        Self::AudioMix {
            message: msg.into(),
        }
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe {
            message: msg.into(),
        }
    }

    pub fn transcoder(msg: impl Into<String>) -> Self {
        Self::Transcoder {
            message: msg.into(),
        }
    }

    pub fn update(msg: impl Into<String>) -> Self {
        Self::Update {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error represents a user-initiated cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}
