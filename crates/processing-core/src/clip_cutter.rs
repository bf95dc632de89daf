//! Cutting highlight clips out of a long recording.
//!
//! Each highlight becomes its own file covering the highlight plus some
//! padding on both sides. The padding is recorded as trims on the resulting
//! [`Clip`], so re-applying the trims yields exactly the detected range while
//! the editor still has a little room to extend it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use highlighter_common::concurrency::pmap;
use highlighter_common::config::CutterConfig;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_common::process::{isolate_process_group, kill_process_tree};
use highlighter_project_model::{sort_by_start, Clip, Highlight};
use highlighter_render_engine::{MediaInfo, Transcoder};

/// The padded region of the source that one highlight is cut to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CutWindow {
    /// Start of the cut in the source (seconds).
    pub cut_start: f64,
    /// End of the cut in the source (seconds).
    pub cut_end: f64,
    /// Padding kept before the highlight, as a start trim.
    pub trim_in: f64,
    /// Padding kept after the highlight, as an end trim.
    pub trim_out: f64,
}

impl CutWindow {
    /// Pad `[start, end]` by `padding` on both sides, clamped to
    /// `[0, source_duration]`.
    pub fn padded(start: f64, end: f64, padding: f64, source_duration: f64) -> Self {
        let duration = source_duration.max(0.0);
        let end = end.clamp(0.0, duration);
        let start = start.clamp(0.0, end);
        let padding = padding.max(0.0);

        let cut_start = (start - padding).max(0.0);
        let cut_end = (end + padding).min(duration);
        Self {
            cut_start,
            cut_end,
            trim_in: start - cut_start,
            trim_out: cut_end - end,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.cut_end - self.cut_start
    }
}

/// How the video track is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutMode {
    /// Copy the compressed stream untouched.
    StreamCopy,
    /// Re-encode to H.264.
    Transcode,
}

impl CutMode {
    /// Stream copy is only safe for H.264 video already in an MP4 container.
    pub fn for_source(info: &MediaInfo) -> Self {
        let h264 = info.video_codec.as_deref() == Some("h264");
        if h264 && info.is_mp4_family() {
            CutMode::StreamCopy
        } else {
            CutMode::Transcode
        }
    }
}

/// One successfully cut highlight.
#[derive(Debug, Clone, Serialize)]
pub struct CutClip {
    pub highlight: Highlight,
    pub window: CutWindow,
    pub output_path: PathBuf,
    pub mode: CutMode,
}

impl CutClip {
    /// A clip over the cut file, trimmed back to the highlight.
    pub fn to_clip(&self) -> Clip {
        let mut clip = Clip::new(&self.output_path).with_trims(self.window.trim_in, self.window.trim_out);
        clip.duration_secs = Some(self.window.duration_secs());
        clip
    }
}

#[derive(Debug, Clone)]
struct CutJob {
    highlight: Highlight,
    window: CutWindow,
    output_path: PathBuf,
}

/// Cuts highlights from one source into separate files.
#[derive(Debug, Clone)]
pub struct ClipCutter {
    transcoder: Transcoder,
    output_dir: PathBuf,
    padding_secs: f64,
    concurrency: usize,
    timeout: Duration,
}

impl ClipCutter {
    pub fn new(transcoder: Transcoder, output_dir: impl Into<PathBuf>, config: &CutterConfig) -> Self {
        Self {
            transcoder,
            output_dir: output_dir.into(),
            padding_secs: config.padding_secs,
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Override the per-cut time limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn padding_secs(&self) -> f64 {
        self.padding_secs
    }

    /// Cut every highlight. Cuts that fail or time out are left out of the
    /// result; only an unreadable source fails the whole batch.
    pub async fn cut(&self, source: &Path, highlights: &[Highlight]) -> HighlighterResult<Vec<CutClip>> {
        self.cut_with_progress(source, highlights, |_, _| {}).await
    }

    /// [`Self::cut`] reporting `(completed, total)` after each cut.
    pub async fn cut_with_progress(
        &self,
        source: &Path,
        highlights: &[Highlight],
        mut on_progress: impl FnMut(usize, usize),
    ) -> HighlighterResult<Vec<CutClip>> {
        if !source.exists() {
            return Err(HighlighterError::FileNotFound {
                path: source.to_path_buf(),
            });
        }
        let info = self.transcoder.probe_media(source).await?;
        let mode = CutMode::for_source(&info);
        std::fs::create_dir_all(&self.output_dir)?;

        let jobs = self.plan_jobs(source, highlights, info.duration_secs);
        let total = jobs.len();
        tracing::info!(
            source = %source.display(),
            highlights = highlights.len(),
            cuts = total,
            mode = ?mode,
            "Cutting highlights"
        );

        let results = pmap(
            jobs,
            self.concurrency,
            |job| self.cut_one(source, job, mode),
            |_, done| on_progress(done, total),
        )
        .await?;

        let clips: Vec<CutClip> = results.into_iter().flatten().collect();
        if clips.len() < total {
            tracing::warn!(kept = clips.len(), planned = total, "Some cuts were dropped");
        }
        Ok(clips)
    }

    fn plan_jobs(&self, source: &Path, highlights: &[Highlight], duration: f64) -> Vec<CutJob> {
        let mut sorted = highlights.to_vec();
        sort_by_start(&mut sorted);

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording".to_string());

        sorted
            .into_iter()
            .enumerate()
            .filter_map(|(index, highlight)| {
                let window = CutWindow::padded(
                    highlight.start_time,
                    highlight.end_time,
                    self.padding_secs,
                    duration,
                );
                if window.duration_secs() <= 0.0 {
                    tracing::warn!(
                        start = highlight.start_time,
                        end = highlight.end_time,
                        "Skipping empty highlight"
                    );
                    return None;
                }
                Some(CutJob {
                    output_path: self
                        .output_dir
                        .join(format!("{stem}-highlight-{:03}.mp4", index + 1)),
                    highlight,
                    window,
                })
            })
            .collect()
    }

    async fn cut_one(
        &self,
        source: &Path,
        job: CutJob,
        mode: CutMode,
    ) -> HighlighterResult<Option<CutClip>> {
        let args = cut_args(source, &job.window, mode, &job.output_path);
        let mut cmd = self.transcoder.ffmpeg_command();
        cmd.args(&args);
        isolate_process_group(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(output = %job.output_path.display(), error = %err, "Failed to start cut");
                return Ok(None);
            }
        };
        let pid = child.id();

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(output = %job.output_path.display(), "Cut finished");
                Ok(Some(CutClip {
                    highlight: job.highlight,
                    window: job.window,
                    output_path: job.output_path,
                    mode,
                }))
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    output = %job.output_path.display(),
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Cut failed, dropping"
                );
                remove_partial(&job.output_path);
                Ok(None)
            }
            Ok(Err(err)) => {
                tracing::warn!(output = %job.output_path.display(), error = %err, "Cut failed, dropping");
                remove_partial(&job.output_path);
                Ok(None)
            }
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_tree(pid);
                }
                tracing::warn!(
                    output = %job.output_path.display(),
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Cut timed out, dropping"
                );
                remove_partial(&job.output_path);
                Ok(None)
            }
        }
    }
}

fn cut_args(source: &Path, window: &CutWindow, mode: CutMode, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-v".to_string(),
        "error".to_string(),
        "-ss".to_string(),
        format!("{:.6}", window.cut_start),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-t".to_string(),
        format!("{:.6}", window.duration_secs()),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "0:a?".to_string(),
    ];
    match mode {
        CutMode::StreamCopy => args.extend(["-c:v".to_string(), "copy".to_string()]),
        CutMode::Transcode => args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            "18".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]),
    }
    args.extend([
        "-c:a".to_string(),
        "aac".to_string(),
        "-avoid_negative_ts".to_string(),
        "make_zero".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

fn remove_partial(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %err, "Failed to remove partial cut");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn info(codec: &str, format: &str) -> MediaInfo {
        MediaInfo {
            duration_secs: 60.0,
            video_codec: Some(codec.to_string()),
            width: Some(1920),
            height: Some(1080),
            has_audio: true,
            format_name: format.to_string(),
        }
    }

    #[test]
    fn test_padding_clamped_at_file_edges() {
        let w = CutWindow::padded(1.0, 59.0, 2.0, 60.0);
        assert_eq!(w.cut_start, 0.0);
        assert_eq!(w.trim_in, 1.0);
        assert_eq!(w.cut_end, 60.0);
        assert_eq!(w.trim_out, 1.0);
    }

    #[test]
    fn test_highlight_past_end_is_clamped() {
        let w = CutWindow::padded(58.0, 70.0, 2.0, 60.0);
        assert_eq!(w.cut_start, 56.0);
        assert_eq!(w.cut_end, 60.0);
        assert_eq!(w.trim_out, 0.0);
    }

    #[test]
    fn test_stream_copy_only_for_h264_mp4() {
        assert_eq!(
            CutMode::for_source(&info("h264", "mov,mp4,m4a,3gp,3g2,mj2")),
            CutMode::StreamCopy
        );
        assert_eq!(CutMode::for_source(&info("hevc", "mov,mp4")), CutMode::Transcode);
        assert_eq!(CutMode::for_source(&info("h264", "matroska,webm")), CutMode::Transcode);
    }

    #[test]
    fn test_cut_args_per_mode() {
        let w = CutWindow::padded(10.0, 20.0, 2.0, 60.0);
        let copy = cut_args(Path::new("rec.mp4"), &w, CutMode::StreamCopy, Path::new("o.mp4"));
        let joined = copy.join(" ");
        assert!(joined.contains("-ss 8.000000 -i rec.mp4 -t 14.000000"));
        assert!(joined.contains("-c:v copy"));

        let encode = cut_args(Path::new("rec.mkv"), &w, CutMode::Transcode, Path::new("o.mp4"));
        assert!(encode.join(" ").contains("-c:v libx264"));
    }

    #[test]
    fn test_cut_clip_trims_back_to_highlight() {
        let cut = CutClip {
            highlight: Highlight::new(10.0, 20.0),
            window: CutWindow::padded(10.0, 20.0, 2.0, 60.0),
            output_path: PathBuf::from("o.mp4"),
            mode: CutMode::StreamCopy,
        };
        let clip = cut.to_clip();
        assert_eq!(clip.start_trim, 2.0);
        assert_eq!(clip.end_trim, 2.0);
        assert_eq!(clip.trimmed_duration_secs(), Some(10.0));
    }

    proptest! {
        #[test]
        fn prop_trims_reconstruct_highlight(
            duration in 1.0f64..600.0,
            a in 0.0f64..1.0,
            b in 0.0f64..1.0,
            padding in 0.0f64..5.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (start, end) = (lo * duration, hi * duration);
            let w = CutWindow::padded(start, end, padding, duration);

            prop_assert!((w.cut_start + w.trim_in - start).abs() < 1e-9);
            prop_assert!((w.cut_end - w.trim_out - end).abs() < 1e-9);
            prop_assert!(w.cut_start >= 0.0);
            prop_assert!(w.cut_end <= duration);
            prop_assert!(w.trim_in <= padding + 1e-9);
            prop_assert!(w.trim_out <= padding + 1e-9);
        }
    }
}
