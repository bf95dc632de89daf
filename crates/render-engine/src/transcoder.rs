//! ffmpeg/ffprobe invocation.
//!
//! Every decode, encode, extraction, and probe goes through a [`Transcoder`],
//! which owns the binary paths and applies the shared spawn flags.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;

use highlighter_common::config::TranscoderConfig;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_common::process::{command_exists, configure_command};

/// Paths to the external transcoder binaries.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self::new(&config.ffmpeg_path, &config.ffprobe_path)
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }

    /// Whether both binaries can be located.
    pub fn is_available(&self) -> bool {
        command_exists(&self.ffmpeg) && command_exists(&self.ffprobe)
    }

    /// A configured ffmpeg command with stdin closed and output discarded.
    pub fn ffmpeg_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        configure_command(&mut cmd);
        cmd
    }

    /// Run ffmpeg to completion. On failure returns the trimmed stderr.
    pub async fn run_ffmpeg(&self, args: &[String]) -> Result<(), String> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let output = self
            .ffmpeg_command()
            .args(args)
            .output()
            .await
            .map_err(|e| format!("Failed to start ffmpeg: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "ffmpeg failed (status {}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    /// Run ffprobe with JSON output and parse the result.
    async fn run_ffprobe(&self, args: &[&str], path: &Path) -> HighlighterResult<FfprobeOutput> {
        let mut cmd = tokio::process::Command::new(&self.ffprobe);
        cmd.args(["-v", "error", "-print_format", "json"])
            .args(args)
            .arg(path)
            .stdin(Stdio::null());
        configure_command(&mut cmd);

        let output = cmd
            .output()
            .await
            .map_err(|e| HighlighterError::probe(format!("Failed to start ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(HighlighterError::probe(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            HighlighterError::probe(format!(
                "Unparsable ffprobe output for {}: {e}",
                path.display()
            ))
        })
    }

    /// Container duration in seconds.
    pub async fn probe_duration(&self, path: &Path) -> HighlighterResult<f64> {
        let probe = self
            .run_ffprobe(&["-show_entries", "format=duration"], path)
            .await?;
        probe
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| {
                HighlighterError::probe(format!("No duration reported for {}", path.display()))
            })
    }

    /// Whether the file carries at least one audio stream.
    pub async fn probe_has_audio(&self, path: &Path) -> HighlighterResult<bool> {
        let probe = self
            .run_ffprobe(
                &["-select_streams", "a", "-show_entries", "stream=index,codec_type"],
                path,
            )
            .await?;
        Ok(probe.has_audio())
    }

    /// Full stream/container description.
    pub async fn probe_media(&self, path: &Path) -> HighlighterResult<MediaInfo> {
        let probe = self
            .run_ffprobe(&["-show_format", "-show_streams"], path)
            .await?;
        MediaInfo::from_probe(probe, path)
    }
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::from_config(&TranscoderConfig::default())
    }
}

/// Summary of a probed media file.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Container duration (seconds).
    pub duration_secs: f64,

    /// First video stream codec (e.g. "h264").
    pub video_codec: Option<String>,

    /// First video stream dimensions.
    pub width: Option<u32>,
    pub height: Option<u32>,

    /// Whether any audio stream exists.
    pub has_audio: bool,

    /// ffprobe container names (e.g. "mov,mp4,m4a,3gp,3g2,mj2").
    pub format_name: String,
}

impl MediaInfo {
    fn from_probe(probe: FfprobeOutput, path: &Path) -> HighlighterResult<Self> {
        let has_audio = probe.has_audio();
        let format = probe.format.unwrap_or_default();
        let duration_secs = format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .ok_or_else(|| {
                HighlighterError::probe(format!("No duration reported for {}", path.display()))
            })?;
        let video = probe
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));

        Ok(Self {
            duration_secs,
            video_codec: video.and_then(|s| s.codec_name.clone()),
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
            has_audio,
            format_name: format.format_name.unwrap_or_default(),
        })
    }

    /// Whether the container is in the MP4/MOV family.
    pub fn is_mp4_family(&self) -> bool {
        self.format_name.split(',').any(|name| name == "mp4" || name == "mov")
    }
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

impl FfprobeOutput {
    fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref().map_or(true, |t| t == "audio"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}
