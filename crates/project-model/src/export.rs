//! Export configuration types.
//!
//! An [`ExportRequest`] captures everything one export invocation needs. Its
//! [`ExportOptions`] are chosen once (preview or final) and never change while
//! the export runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::Clip;
use crate::transition::TransitionSpec;

/// x264 speed/quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    #[default]
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncoderPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            EncoderPreset::Ultrafast => "ultrafast",
            EncoderPreset::Superfast => "superfast",
            EncoderPreset::Veryfast => "veryfast",
            EncoderPreset::Faster => "faster",
            EncoderPreset::Fast => "fast",
            EncoderPreset::Medium => "medium",
            EncoderPreset::Slow => "slow",
            EncoderPreset::Slower => "slower",
            EncoderPreset::Veryslow => "veryslow",
        }
    }
}

/// Output format of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Output frame rate.
    pub fps: u32,

    /// Output resolution (pixels).
    pub width: u32,
    pub height: u32,

    /// Encoder speed preset.
    #[serde(default)]
    pub preset: EncoderPreset,
}

impl ExportOptions {
    /// Fast low-resolution render for in-app preview.
    pub fn preview() -> Self {
        Self {
            fps: 30,
            width: 1280,
            height: 720,
            preset: EncoderPreset::Ultrafast,
        }
    }

    /// Full-quality render at the given resolution.
    pub fn final_quality(width: u32, height: u32) -> Self {
        Self {
            fps: 30,
            width,
            height,
            preset: EncoderPreset::Fast,
        }
    }

    /// Reject formats no frame can be produced in.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.fps == 0 {
            return Err(ModelError::InvalidOptions("fps must be positive".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::InvalidOptions(format!(
                "resolution {}x{} has no pixels",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Bytes in one RGBA frame at this resolution.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::final_quality(1920, 1080)
    }
}

/// Background music settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AudioMixSpec {
    /// Whether music is mixed in at all.
    pub music_enabled: bool,

    /// Music file, looped to cover the whole export.
    pub music_path: Option<PathBuf>,

    /// Music volume relative to the clip audio, in percent.
    pub music_volume_percent: f64,
}

impl AudioMixSpec {
    /// The music file and its linear volume, if music should be mixed.
    pub fn music_track(&self) -> Option<(&Path, f64)> {
        if !self.music_enabled {
            return None;
        }
        let path = self.music_path.as_deref()?;
        Some((path, (self.music_volume_percent / 100.0).max(0.0)))
    }
}

/// A complete export job description (the CLI reads this from JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Ordered clips to render.
    pub clips: Vec<Clip>,

    /// Transition between consecutive clips.
    #[serde(default)]
    pub transition: TransitionSpec,

    /// Background music.
    #[serde(default)]
    pub audio: AudioMixSpec,

    /// Output format.
    #[serde(default)]
    pub options: ExportOptions,

    /// Whether this is a preview render (reported in telemetry).
    #[serde(default)]
    pub preview: bool,

    /// Destination file.
    pub output_path: PathBuf,
}

impl ExportRequest {
    /// Load a request from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Errors loading model files.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid export options: {0}")]
    InvalidOptions(String),
}
