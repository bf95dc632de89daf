//! Raw RGBA frame encoding into the final video file.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_common::process::drain_stderr;
use highlighter_project_model::ExportOptions;

use crate::transcoder::Transcoder;

/// The closing fade begins this many seconds before the end.
const FADE_OUT_LEAD_SECS: f64 = 1.2;
/// Length of the closing fade.
const FADE_OUT_SECS: f64 = 1.0;

/// Streams frames into an ffmpeg encode process muxed with a finished
/// audio track.
pub struct ProcessFrameWriter {
    transcoder: Transcoder,
    output_path: PathBuf,
    audio_path: PathBuf,
    options: ExportOptions,
    total_duration_secs: f64,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_task: Option<JoinHandle<String>>,
    frames_written: u64,
}

impl ProcessFrameWriter {
    pub fn new(
        transcoder: Transcoder,
        output_path: impl Into<PathBuf>,
        audio_path: impl Into<PathBuf>,
        options: ExportOptions,
        total_duration_secs: f64,
    ) -> Self {
        Self {
            transcoder,
            output_path: output_path.into(),
            audio_path: audio_path.into(),
            options,
            total_duration_secs: total_duration_secs.max(0.0),
            child: None,
            stdin: None,
            stderr_task: None,
            frames_written: 0,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn encode_args(&self) -> Vec<String> {
        let fade_start = (self.total_duration_secs - FADE_OUT_LEAD_SECS).max(0.0);
        vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-vcodec".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-s".to_string(),
            format!("{}x{}", self.options.width, self.options.height),
            "-framerate".to_string(),
            self.options.fps.to_string(),
            "-i".to_string(),
            "-".to_string(),
            "-i".to_string(),
            self.audio_path.to_string_lossy().into_owned(),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-vf".to_string(),
            format!("fade=type=out:duration={FADE_OUT_SECS}:start_time={fade_start:.6}"),
            "-af".to_string(),
            format!("afade=type=out:duration={FADE_OUT_SECS}:start_time={fade_start:.6}"),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            "-preset".to_string(),
            self.options.preset.as_str().to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "128k".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            self.output_path.to_string_lossy().into_owned(),
        ]
    }

    fn ensure_started(&mut self) -> HighlighterResult<()> {
        if self.child.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut cmd = self.transcoder.ffmpeg_command();
        cmd.args(self.encode_args()).stdin(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| HighlighterError::frame_write(format!("Failed to start encoder: {e}")))?;

        self.stdin = child.stdin.take();
        self.stderr_task = child.stderr.take().map(drain_stderr);
        tracing::info!(
            pid = child.id(),
            output = %self.output_path.display(),
            preset = self.options.preset.as_str(),
            "Encoder started"
        );
        self.child = Some(child);
        Ok(())
    }

    /// Write one RGBA frame. Awaits until the encoder has accepted it.
    pub async fn write_next_frame(&mut self, frame: &[u8]) -> HighlighterResult<()> {
        if frame.len() != self.options.frame_bytes() {
            return Err(HighlighterError::frame_write(format!(
                "Frame is {} bytes, expected {}",
                frame.len(),
                self.options.frame_bytes()
            )));
        }
        self.ensure_started()?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(HighlighterError::frame_write("Encoder input already closed"));
        };
        if let Err(err) = stdin.write_all(frame).await {
            let stderr = self.collect_failure().await;
            return Err(HighlighterError::frame_write(format!(
                "Encoder rejected frame {}: {err} {stderr}",
                self.frames_written
            )));
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Close the input and wait for the encoder to finalize the file.
    pub async fn end(&mut self) -> HighlighterResult<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                tracing::debug!(error = %err, "Encoder stdin shutdown failed");
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| HighlighterError::frame_write(format!("Failed to wait for encoder: {e}")))?;
        let stderr = self.take_stderr().await;

        if !status.success() {
            return Err(HighlighterError::frame_write(format!(
                "Encoder exited with {status}: {}",
                stderr.trim()
            )));
        }

        tracing::info!(
            output = %self.output_path.display(),
            frames = self.frames_written,
            "Encoder finished"
        );
        Ok(())
    }

    /// Kill the encoder without finalizing. The partial output is left for
    /// the caller to remove.
    pub async fn abort(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                tracing::debug!(error = %err, "Encoder already exited");
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    async fn collect_failure(&mut self) -> String {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.wait().await;
        }
        self.take_stderr().await
    }

    async fn take_stderr(&mut self) -> String {
        match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use highlighter_project_model::EncoderPreset;

    fn tiny_options() -> ExportOptions {
        ExportOptions {
            fps: 30,
            width: 2,
            height: 2,
            preset: EncoderPreset::Ultrafast,
        }
    }

    #[test]
    fn test_encode_args_fade_and_codecs() {
        let writer = ProcessFrameWriter::new(
            Transcoder::default(),
            "/out/final.mp4",
            "/tmp/audio.flac",
            ExportOptions::default(),
            20.0,
        );
        let joined = writer.encode_args().join(" ");
        assert!(joined.contains("-s 1920x1080 -framerate 30 -i - -i /tmp/audio.flac"));
        assert!(joined.contains("fade=type=out:duration=1:start_time=18.800000"));
        assert!(joined.contains("afade=type=out:duration=1:start_time=18.800000"));
        assert!(joined.contains("-c:v libx264 -profile:v high -preset fast"));
        assert!(joined.contains("-c:a aac"));
    }

    #[test]
    fn test_fade_start_clamped_for_short_exports() {
        let writer =
            ProcessFrameWriter::new(Transcoder::default(), "o.mp4", "a.flac", tiny_options(), 0.5);
        let joined = writer.encode_args().join(" ");
        assert!(joined.contains("start_time=0.000000"));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> Transcoder {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Transcoder::new(path, "ffprobe")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_writes_frames_and_finalizes() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = fake_ffmpeg(dir.path(), "cat > /dev/null");
        let mut writer = ProcessFrameWriter::new(
            transcoder,
            dir.path().join("out.mp4"),
            "a.flac",
            tiny_options(),
            1.0,
        );
        for _ in 0..5 {
            writer.write_next_frame(&[0u8; 16]).await.unwrap();
        }
        writer.end().await.unwrap();
        assert_eq!(writer.frames_written(), 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wrong_frame_size_is_rejected() {
        let mut writer =
            ProcessFrameWriter::new(Transcoder::default(), "o.mp4", "a.flac", tiny_options(), 1.0);
        let err = writer.write_next_frame(&[0u8; 3]).await.unwrap_err();
        assert!(matches!(err, HighlighterError::FrameWrite { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_encoder_failure_surfaces_on_end() {
        let dir = tempfile::tempdir().unwrap();
        let transcoder = fake_ffmpeg(dir.path(), "cat > /dev/null; echo bad >&2; exit 3");
        let mut writer = ProcessFrameWriter::new(
            transcoder,
            dir.path().join("out.mp4"),
            "a.flac",
            tiny_options(),
            1.0,
        );
        writer.write_next_frame(&[0u8; 16]).await.unwrap();
        let err = writer.end().await.unwrap_err();
        assert!(err.to_string().contains("bad"));
    }
}
