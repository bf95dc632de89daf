//! Raw RGBA frame decoding from a source file.
//!
//! A [`ProcessFrameSource`] drives one ffmpeg decode process per clip and
//! exposes the decoded stream one frame at a time. Decoded bytes accumulate
//! in a write buffer; once a full frame is present the write and read
//! buffers are swapped, so the frame handed out stays valid until the next
//! call. The pipe is only read while a frame is being requested, which keeps
//! the decoder blocked on a full pipe instead of racing ahead of the encoder.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;

use highlighter_common::clock::secs_to_frames;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_common::process::drain_stderr;
use highlighter_project_model::ExportOptions;

use crate::transcoder::Transcoder;

/// Bytes pulled from the decoder pipe per read.
const PIPE_CHUNK_BYTES: usize = 64 * 1024;

/// Thumbnails in a scrubbing sprite.
pub const SCRUB_SPRITE_FRAMES: u32 = 10;
/// Thumbnail width in a scrubbing sprite.
pub const SCRUB_THUMB_WIDTH: u32 = 266;
/// Thumbnail height in a scrubbing sprite.
pub const SCRUB_THUMB_HEIGHT: u32 = 150;

/// Frame-by-frame reader over a trimmed region of one source file.
pub struct ProcessFrameSource {
    transcoder: Transcoder,
    source_path: PathBuf,
    start_trim: f64,
    duration_secs: f64,
    options: ExportOptions,
    frame_bytes: usize,

    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<String>>,

    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    write_len: usize,
    chunk: Vec<u8>,
    chunk_len: usize,
    chunk_pos: usize,

    frames_read: u64,
    finished: bool,
    errored: bool,
}

impl ProcessFrameSource {
    /// Prepare a source over `[start_trim, start_trim + duration_secs)` of
    /// `source_path`. Nothing is spawned until the first frame is requested.
    pub fn new(
        transcoder: Transcoder,
        source_path: impl Into<PathBuf>,
        start_trim: f64,
        duration_secs: f64,
        options: ExportOptions,
    ) -> Self {
        let frame_bytes = options.frame_bytes();
        Self {
            transcoder,
            source_path: source_path.into(),
            start_trim: start_trim.max(0.0),
            duration_secs: duration_secs.max(0.0),
            options,
            frame_bytes,
            child: None,
            stdout: None,
            stderr_task: None,
            read_buffer: vec![0; frame_bytes],
            write_buffer: vec![0; frame_bytes],
            write_len: 0,
            chunk: vec![0; PIPE_CHUNK_BYTES],
            chunk_len: 0,
            chunk_pos: 0,
            frames_read: 0,
            finished: false,
            errored: false,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Frames the decoder is expected to produce.
    pub fn expected_frames(&self) -> u64 {
        secs_to_frames(self.duration_secs, self.options.fps)
    }

    /// Frames successfully returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// The most recently completed frame.
    pub fn current_frame(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Whether the decoder reached end of stream.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn decode_args(&self) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-nostdin".to_string(),
            "-ss".to_string(),
            format!("{:.6}", self.start_trim),
            "-i".to_string(),
            self.source_path.to_string_lossy().into_owned(),
            "-t".to_string(),
            format!("{:.6}", self.duration_secs),
            "-an".to_string(),
            "-vf".to_string(),
            format!(
                "fps={},scale={}:{}",
                self.options.fps, self.options.width, self.options.height
            ),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgba".to_string(),
            "-".to_string(),
        ]
    }

    fn ensure_started(&mut self) -> HighlighterResult<()> {
        if self.child.is_some() {
            return Ok(());
        }

        let mut cmd = self.transcoder.ffmpeg_command();
        cmd.args(self.decode_args()).stdout(Stdio::piped());
        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(
                path = %self.source_path.display(),
                error = %e,
                "Failed to start frame decoder"
            );
            HighlighterError::frame_read(&self.source_path)
        })?;

        self.stdout = child.stdout.take();
        self.stderr_task = child.stderr.take().map(drain_stderr);
        tracing::debug!(
            pid = child.id(),
            path = %self.source_path.display(),
            start_trim = self.start_trim,
            duration_secs = self.duration_secs,
            "Frame decoder started"
        );
        self.child = Some(child);
        Ok(())
    }

    /// Read the next frame into [`Self::current_frame`].
    ///
    /// Returns `Ok(false)` once the decoder ended cleanly. A decoder that
    /// exits with a failure status yields a frame read error, and so does
    /// every call after that.
    pub async fn read_next_frame(&mut self) -> HighlighterResult<bool> {
        if self.errored {
            return Err(HighlighterError::frame_read(&self.source_path));
        }
        if self.finished {
            return Ok(false);
        }
        self.ensure_started()?;

        loop {
            if self.chunk_pos < self.chunk_len {
                let needed = self.frame_bytes - self.write_len;
                let available = self.chunk_len - self.chunk_pos;
                let n = needed.min(available);
                self.write_buffer[self.write_len..self.write_len + n]
                    .copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + n]);
                self.write_len += n;
                self.chunk_pos += n;

                if self.write_len == self.frame_bytes {
                    std::mem::swap(&mut self.read_buffer, &mut self.write_buffer);
                    self.write_len = 0;
                    self.frames_read += 1;
                    return Ok(true);
                }
                continue;
            }

            let Some(stdout) = self.stdout.as_mut() else {
                return Err(HighlighterError::frame_read(&self.source_path));
            };
            match stdout.read(&mut self.chunk).await {
                Ok(0) => {
                    self.chunk_len = 0;
                    self.chunk_pos = 0;
                    return self.finish().await.map(|()| false);
                }
                Ok(n) => {
                    self.chunk_len = n;
                    self.chunk_pos = 0;
                }
                Err(err) => {
                    tracing::error!(
                        path = %self.source_path.display(),
                        error = %err,
                        "Frame decoder pipe read failed"
                    );
                    self.errored = true;
                    self.dispose().await;
                    return Err(HighlighterError::frame_read(&self.source_path));
                }
            }
        }
    }

    async fn finish(&mut self) -> HighlighterResult<()> {
        self.stdout = None;
        if self.write_len > 0 {
            tracing::warn!(
                path = %self.source_path.display(),
                bytes = self.write_len,
                "Discarding partial trailing frame"
            );
            self.write_len = 0;
        }

        let status = match self.child.as_mut() {
            Some(child) => child.wait().await.map(Some),
            None => Ok(None),
        };
        let stderr = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        self.child = None;

        match status {
            Ok(Some(status)) if !status.success() => {
                tracing::error!(
                    path = %self.source_path.display(),
                    status = %status,
                    stderr = %stderr.trim(),
                    "Frame decoder exited with failure"
                );
                self.errored = true;
                Err(HighlighterError::frame_read(&self.source_path))
            }
            Err(err) => {
                tracing::error!(
                    path = %self.source_path.display(),
                    error = %err,
                    "Failed to wait for frame decoder"
                );
                self.errored = true;
                Err(HighlighterError::frame_read(&self.source_path))
            }
            _ => {
                tracing::debug!(
                    path = %self.source_path.display(),
                    frames = self.frames_read,
                    expected = self.expected_frames(),
                    "Frame decoder finished"
                );
                self.finished = true;
                Ok(())
            }
        }
    }

    /// Stop the decoder if it is still running. Safe to call repeatedly.
    pub async fn dispose(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                tracing::debug!(error = %err, "Frame decoder already exited");
            }
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if !self.errored {
            self.finished = true;
        }
    }

    /// Render a horizontal strip of evenly spaced thumbnails as a JPEG.
    pub async fn export_scrubbing_sprite(&self, output_path: &Path) -> HighlighterResult<()> {
        let args = scrubbing_sprite_args(
            &self.source_path,
            self.start_trim,
            self.duration_secs,
            output_path,
        );
        self.transcoder
            .run_ffmpeg(&args)
            .await
            .map_err(HighlighterError::transcoder)?;
        tracing::info!(
            source = %self.source_path.display(),
            sprite = %output_path.display(),
            "Wrote scrubbing sprite"
        );
        Ok(())
    }
}

fn scrubbing_sprite_args(
    source_path: &Path,
    start_trim: f64,
    duration_secs: f64,
    output_path: &Path,
) -> Vec<String> {
    let interval = (duration_secs / SCRUB_SPRITE_FRAMES as f64).max(0.001);
    vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{start_trim:.6}"),
        "-i".to_string(),
        source_path.to_string_lossy().into_owned(),
        "-t".to_string(),
        format!("{duration_secs:.6}"),
        "-vf".to_string(),
        format!(
            "fps=1/{interval:.6},scale={SCRUB_THUMB_WIDTH}:{SCRUB_THUMB_HEIGHT},tile={SCRUB_SPRITE_FRAMES}x1"
        ),
        "-frames:v".to_string(),
        "1".to_string(),
        "-q:v".to_string(),
        "5".to_string(),
        output_path.to_string_lossy().into_owned(),
    ]
}
