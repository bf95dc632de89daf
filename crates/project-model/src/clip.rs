//! Clips: trimmed regions of recordings that make up an export.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A registered source file plus the trims applied to it.
///
/// `duration_secs` and `has_audio` are unknown (`None`) until the first probe
/// and cached afterwards. A clip whose file disappears is marked `deleted`
/// and silently skipped by export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Backing media file.
    pub source_path: PathBuf,

    /// Full (untrimmed) duration in seconds, once probed.
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Seconds trimmed from the start.
    #[serde(default)]
    pub start_trim: f64,

    /// Seconds trimmed from the end.
    #[serde(default)]
    pub end_trim: f64,

    /// Whether the file has an audio stream, once probed.
    #[serde(default)]
    pub has_audio: Option<bool>,

    /// Set when the backing file no longer exists.
    #[serde(default)]
    pub deleted: bool,
}

impl Clip {
    /// Register a file with no trims.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            duration_secs: None,
            start_trim: 0.0,
            end_trim: 0.0,
            has_audio: None,
            deleted: false,
        }
    }

    /// Builder-style trim setter.
    pub fn with_trims(mut self, start_trim: f64, end_trim: f64) -> Self {
        self.set_trims(start_trim, end_trim);
        self
    }

    /// Update trims. Negative values are clamped to zero.
    pub fn set_trims(&mut self, start_trim: f64, end_trim: f64) {
        self.start_trim = start_trim.max(0.0);
        self.end_trim = end_trim.max(0.0);
    }

    pub fn path(&self) -> &Path {
        &self.source_path
    }

    /// Duration after trims, if the clip has been probed.
    pub fn trimmed_duration_secs(&self) -> Option<f64> {
        self.duration_secs
            .map(|d| (d - self.start_trim - self.end_trim).max(0.0))
    }

    /// Re-check the backing file and mark the clip deleted if it vanished.
    /// Returns the new `deleted` flag.
    pub fn refresh_deleted(&mut self) -> bool {
        if !self.source_path.exists() {
            self.deleted = true;
        }
        self.deleted
    }
}
