//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// External transcoder binaries.
    pub transcoder: TranscoderConfig,

    /// Highlight detector installation and protocol settings.
    pub detector: DetectorConfig,

    /// Highlight clip cutting parameters.
    pub cutter: CutterConfig,

    /// Export rendering settings.
    pub render: RenderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Paths to the ffmpeg/ffprobe pair used for decode, encode, and probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// ffmpeg binary (bare names are resolved on `PATH`).
    pub ffmpeg_path: PathBuf,

    /// ffprobe binary (bare names are resolved on `PATH`).
    pub ffprobe_path: PathBuf,
}

/// Highlight detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Root of the detector installation (`bin/`, versioned dirs, manifest).
    pub install_root: PathBuf,

    /// Remote manifest describing the latest detector release.
    pub manifest_url: String,

    /// Literal token opening a framed stdout message.
    pub start_token: String,

    /// Literal token closing a framed stdout message.
    pub end_token: String,
}

/// Parameters for cutting highlight clips out of a recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CutterConfig {
    /// Padding added before and after each highlight (seconds).
    pub padding_secs: f64,

    /// Maximum number of cuts running at once.
    pub concurrency: usize,

    /// Hard wall-clock limit per cut (seconds).
    pub timeout_secs: u64,
}

/// Export rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Blend transitions on the GPU when an adapter is available.
    pub gpu: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "highlighter=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            install_root: data_dir().join("detector"),
            manifest_url: "https://cdn.highlighter.dev/detector/manifest.json".to_string(),
            start_token: "<<<HL_START>>>".to_string(),
            end_token: "<<<HL_END>>>".to_string(),
        }
    }
}

impl Default for CutterConfig {
    fn default() -> Self {
        Self {
            padding_secs: 2.0,
            concurrency: 2,
            timeout_secs: 300,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { gpu: true }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("highlighter").join("config.json")
}

/// Default data directory.
fn data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    base.join("highlighter")
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cutter":{"padding_secs":5.0}}"#).unwrap();
        assert_eq!(config.cutter.padding_secs, 5.0);
        assert_eq!(config.cutter.concurrency, 2);
        assert_eq!(config.cutter.timeout_secs, 300);
        assert_eq!(config.transcoder.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.logging.level, "info");
        assert!(config.render.gpu);
    }

    #[test]
    fn test_gpu_can_be_disabled() {
        let config: AppConfig = serde_json::from_str(r#"{"render":{"gpu":false}}"#).unwrap();
        assert!(!config.render.gpu);
        assert_eq!(config.cutter.concurrency, 2);
    }

    #[test]
    fn test_default_tokens_differ() {
        let detector = DetectorConfig::default();
        assert_ne!(detector.start_token, detector.end_token);
        assert!(detector.install_root.ends_with("detector"));
    }
}
