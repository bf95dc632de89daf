//! Per-clip render state.
//!
//! A [`RenderingClip`] probes its source once, then hands out a fresh frame
//! decoder and audio extractor for every export pass. Decoders cannot be
//! rewound, so [`RenderingClip::reset`] must run before each pass.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::OnceCell;

use highlighter_common::clock::secs_to_frames;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_project_model::{Clip, ExportOptions};

use crate::audio::AudioSource;
use crate::frame_source::ProcessFrameSource;
use crate::transcoder::Transcoder;

/// Lifecycle of a [`RenderingClip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipState {
    Uninitialized,
    Initializing,
    Ready,
    /// The backing file is gone; the clip is skipped.
    Deleted,
}

/// Probed facts about a source file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipMetadata {
    pub duration_secs: f64,
    pub has_audio: bool,
}

pub struct RenderingClip {
    clip: Clip,
    transcoder: Transcoder,
    metadata: OnceCell<ClipMetadata>,
    initializing: AtomicBool,
    deleted: AtomicBool,

    frame_source: Option<ProcessFrameSource>,
    audio_source: Option<AudioSource>,
    planned_frames: u64,
    frames_delivered: u64,
}

impl RenderingClip {
    pub fn new(clip: Clip, transcoder: Transcoder) -> Self {
        let deleted = clip.deleted;
        Self {
            clip,
            transcoder,
            metadata: OnceCell::new(),
            initializing: AtomicBool::new(false),
            deleted: AtomicBool::new(deleted),
            frame_source: None,
            audio_source: None,
            planned_frames: 0,
            frames_delivered: 0,
        }
    }

    pub fn clip(&self) -> &Clip {
        &self.clip
    }

    pub fn source_path(&self) -> &Path {
        self.clip.path()
    }

    pub fn state(&self) -> ClipState {
        if self.deleted.load(Ordering::SeqCst) {
            ClipState::Deleted
        } else if self.metadata.initialized() {
            ClipState::Ready
        } else if self.initializing.load(Ordering::SeqCst) {
            ClipState::Initializing
        } else {
            ClipState::Uninitialized
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state() == ClipState::Deleted
    }

    pub fn metadata(&self) -> Option<ClipMetadata> {
        self.metadata.get().copied()
    }

    /// Duration after trims, once initialized.
    pub fn trimmed_duration_secs(&self) -> Option<f64> {
        self.metadata()
            .map(|m| (m.duration_secs - self.clip.start_trim - self.clip.end_trim).max(0.0))
    }

    /// Probe the source. Concurrent callers share one in-flight probe and
    /// later calls return immediately. A vanished file moves the clip to
    /// [`ClipState::Deleted`] instead of failing.
    pub async fn init(&self) -> HighlighterResult<()> {
        if self.is_deleted() {
            return Ok(());
        }
        if !self.clip.source_path.exists() {
            tracing::warn!(path = %self.clip.source_path.display(), "Clip source is gone, skipping");
            self.deleted.store(true, Ordering::SeqCst);
            return Ok(());
        }

        self.metadata
            .get_or_try_init(|| async {
                self.initializing.store(true, Ordering::SeqCst);
                let result = self.probe().await;
                self.initializing.store(false, Ordering::SeqCst);
                result
            })
            .await?;
        Ok(())
    }

    async fn probe(&self) -> HighlighterResult<ClipMetadata> {
        let duration_secs = match self.clip.duration_secs {
            Some(duration) => duration,
            None => self.transcoder.probe_duration(&self.clip.source_path).await?,
        };
        let has_audio = match self.clip.has_audio {
            Some(has_audio) => has_audio,
            None => {
                self.transcoder
                    .probe_has_audio(&self.clip.source_path)
                    .await?
            }
        };
        tracing::debug!(
            path = %self.clip.source_path.display(),
            duration_secs,
            has_audio,
            "Clip probed"
        );
        Ok(ClipMetadata {
            duration_secs,
            has_audio,
        })
    }

    /// Change trims. Takes effect at the next [`Self::reset`].
    pub fn set_trims(&mut self, start_trim: f64, end_trim: f64) {
        self.clip.set_trims(start_trim, end_trim);
    }

    /// Bind fresh sources for an export pass. Any previous decoder is stopped.
    /// `audio_output` receives this clip's extracted audio.
    pub async fn reset(
        &mut self,
        options: &ExportOptions,
        audio_output: impl Into<PathBuf>,
    ) -> HighlighterResult<()> {
        let Some(metadata) = self.metadata() else {
            return Err(HighlighterError::Other(anyhow::anyhow!(
                "Clip {} reset before init",
                self.clip.source_path.display()
            )));
        };
        self.dispose().await;

        let duration = self.trimmed_duration_secs().unwrap_or(0.0);
        self.frame_source = Some(ProcessFrameSource::new(
            self.transcoder.clone(),
            &self.clip.source_path,
            self.clip.start_trim,
            duration,
            *options,
        ));
        self.audio_source = Some(AudioSource::new(
            &self.clip.source_path,
            audio_output,
            self.clip.start_trim,
            duration,
            metadata.has_audio,
        ));
        self.planned_frames = secs_to_frames(duration, options.fps);
        self.frames_delivered = 0;
        Ok(())
    }

    pub fn audio_source(&self) -> Option<&AudioSource> {
        self.audio_source.as_ref()
    }

    /// Frames this pass is expected to deliver.
    pub fn planned_frames(&self) -> u64 {
        self.planned_frames
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    /// Advance to the next frame of this pass.
    ///
    /// Decoders commonly come up one frame short of `duration * fps`; when
    /// exactly the last planned frame is missing the previous frame is
    /// repeated. Any larger shortfall ends the clip early. Frames beyond the
    /// plan are never read.
    pub async fn read_frame(&mut self) -> HighlighterResult<bool> {
        let Some(source) = self.frame_source.as_mut() else {
            return Err(HighlighterError::frame_read(&self.clip.source_path));
        };
        if self.frames_delivered >= self.planned_frames {
            return Ok(false);
        }

        if source.read_next_frame().await? {
            self.frames_delivered += 1;
            return Ok(true);
        }

        let missing = self.planned_frames - self.frames_delivered;
        if missing == 1 && self.frames_delivered > 0 {
            tracing::debug!(
                path = %self.clip.source_path.display(),
                frame = self.frames_delivered,
                "Decoder one frame short, repeating last frame"
            );
            self.frames_delivered += 1;
            return Ok(true);
        }

        tracing::warn!(
            path = %self.clip.source_path.display(),
            delivered = self.frames_delivered,
            planned = self.planned_frames,
            "Decoder ended early"
        );
        Ok(false)
    }

    /// The current frame. Empty before the first successful read.
    pub fn frame(&self) -> &[u8] {
        match &self.frame_source {
            Some(source) if self.frames_delivered > 0 => source.current_frame(),
            _ => &[],
        }
    }

    /// Stop this pass's decoder.
    pub async fn dispose(&mut self) {
        if let Some(mut source) = self.frame_source.take() {
            source.dispose().await;
        }
    }

    /// Write a thumbnail strip of the trimmed region.
    pub async fn export_scrubbing_sprite(
        &self,
        options: &ExportOptions,
        output_path: &Path,
    ) -> HighlighterResult<()> {
        self.init().await?;
        if self.is_deleted() {
            return Err(HighlighterError::FileNotFound {
                path: self.clip.source_path.clone(),
            });
        }
        let source = ProcessFrameSource::new(
            self.transcoder.clone(),
            &self.clip.source_path,
            self.clip.start_trim,
            self.trimmed_duration_secs().unwrap_or(0.0),
            *options,
        );
        source.export_scrubbing_sprite(output_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probed(path: &Path, duration: f64) -> Clip {
        let mut clip = Clip::new(path);
        clip.duration_secs = Some(duration);
        clip.has_audio = Some(false);
        clip
    }

    #[tokio::test]
    async fn test_vanished_file_marks_deleted() {
        let clip = RenderingClip::new(Clip::new("/definitely/missing.mp4"), Transcoder::default());
        assert_eq!(clip.state(), ClipState::Uninitialized);
        clip.init().await.unwrap();
        assert_eq!(clip.state(), ClipState::Deleted);
    }

    #[tokio::test]
    async fn test_known_metadata_skips_probe() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let clip = RenderingClip::new(
            probed(file.path(), 12.0).with_trims(1.0, 1.0),
            Transcoder::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe"),
        );
        clip.init().await.unwrap();
        clip.init().await.unwrap();
        assert_eq!(clip.state(), ClipState::Ready);
        assert_eq!(clip.trimmed_duration_secs(), Some(10.0));
        assert_eq!(clip.metadata().map(|m| m.duration_secs), Some(12.0));
    }

    #[tokio::test]
    async fn test_reset_before_init_fails() {
        let mut clip = RenderingClip::new(Clip::new("a.mp4"), Transcoder::default());
        assert!(clip
            .reset(&ExportOptions::preview(), "a.flac")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_reset_plans_frames_from_trims() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut clip = RenderingClip::new(probed(file.path(), 5.0), Transcoder::default());
        clip.init().await.unwrap();
        clip.set_trims(1.0, 0.0);
        clip.reset(&ExportOptions::preview(), "a.flac").await.unwrap();
        assert_eq!(clip.planned_frames(), 120);
        assert_eq!(clip.frames_delivered(), 0);
        assert!(clip.frame().is_empty());
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
    fn tiny() -> ExportOptions {
        ExportOptions {
            fps: 10,
            width: 2,
            height: 2,
            ..ExportOptions::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_one_short_repeats_last_frame() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"").unwrap();
        // Plan is 5 frames of 16 bytes; emit 4.
        let transcoder = fake_ffmpeg(dir.path(), "head -c 64 /dev/zero");
        let mut clip = RenderingClip::new(probed(&source, 0.5), transcoder);
        clip.init().await.unwrap();
        clip.reset(&tiny(), dir.path().join("a.flac")).await.unwrap();

        let mut frames = 0;
        while clip.read_frame().await.unwrap() {
            assert_eq!(clip.frame().len(), 16);
            frames += 1;
        }
        assert_eq!(frames, 5);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_larger_shortfall_ends_early() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"").unwrap();
        let transcoder = fake_ffmpeg(dir.path(), "head -c 48 /dev/zero");
        let mut clip = RenderingClip::new(probed(&source, 0.5), transcoder);
        clip.init().await.unwrap();
        clip.reset(&tiny(), dir.path().join("a.flac")).await.unwrap();

        let mut frames = 0;
        while clip.read_frame().await.unwrap() {
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overproduction_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"").unwrap();
        let transcoder = fake_ffmpeg(dir.path(), "cat /dev/zero");
        let mut clip = RenderingClip::new(probed(&source, 0.5), transcoder);
        clip.init().await.unwrap();
        clip.reset(&tiny(), dir.path().join("a.flac")).await.unwrap();

        let mut frames = 0;
        while clip.read_frame().await.unwrap() {
            frames += 1;
        }
        assert_eq!(frames, 5);
        clip.dispose().await;
    }
}
