//! Export orchestration.
//!
//! [`RenderPipeline::start_rendering`] runs one export in two phases:
//!
//! 1. **AudioMix**: extract every clip's audio in parallel, join the
//!    intermediates with overlaps matching the video transitions, and
//!    optionally layer looping background music on top.
//! 2. **FrameRender**: walk the clips in order, passing solo frames straight
//!    to the encoder and blending the tail of each clip with the head of the
//!    next one through a [`Transitioner`].
//!
//! Only one export may run per pipeline. Its [`ExportRun`] state is an
//! exclusive resource: a second call while one is active is rejected with
//! [`HighlighterError::ExportInProgress`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::OnceCell;

use highlighter_common::cancel::CancelToken;
use highlighter_common::clock::ProgressThrottle;
use highlighter_common::concurrency::{default_concurrency, pmap};
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_project_model::{ExportOptions, ExportRequest, TransitionSpec, TransitionType};

use crate::audio::{AudioCrossfader, AudioMixer, AudioSource, MixInput};
use crate::frame_writer::ProcessFrameWriter;
use crate::gpu::GpuContext;
use crate::plan::{transition_progress, FramePlan};
use crate::rendering_clip::RenderingClip;
use crate::transcoder::Transcoder;
use crate::transitioner::Transitioner;

/// Minimum wall time between progress reports.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Phases of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    AudioMix,
    FrameRender,
}

/// Mutable state of the single in-flight export.
#[derive(Debug, Clone)]
pub struct ExportRun {
    pub phase: ExportPhase,
    pub current_frame: u64,
    pub total_frames: u64,
    pub cancel: CancelToken,
    pub error: Option<String>,
}

impl ExportRun {
    fn new(cancel: CancelToken) -> Self {
        Self {
            phase: ExportPhase::AudioMix,
            current_frame: 0,
            total_frames: 0,
            cancel,
            error: None,
        }
    }
}

/// Export progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProgress {
    pub phase: ExportPhase,

    /// Units completed: clips during audio mix, frames during render.
    pub frame: u64,

    pub total_frames: u64,

    /// Completion of the current phase, [0, 100].
    pub percent: f64,
}

/// Telemetry emitted once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportMetrics {
    pub clip_count: usize,
    pub transition_type: String,
    pub transition_duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub preview: bool,
    pub elapsed_secs: f64,
    pub frames: u64,
    pub outcome: &'static str,
}

/// Events streamed to the caller while an export runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportEvent {
    Progress(ExportProgress),
    Finished(ExportMetrics),
}

/// How an export ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Exported,
    /// Stopped on request. Partial output may remain on disk.
    Canceled,
    Failed(String),
}

impl ExportOutcome {
    pub fn exported(&self) -> bool {
        matches!(self, ExportOutcome::Exported)
    }

    /// User-facing error message. `None` for success and cancellation.
    pub fn error(&self) -> Option<&str> {
        match self {
            ExportOutcome::Failed(message) => Some(message),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ExportOutcome::Exported => "exported",
            ExportOutcome::Canceled => "canceled",
            ExportOutcome::Failed(_) => "failed",
        }
    }
}

type RunSlot = Arc<Mutex<Option<ExportRun>>>;

fn lock_slot(slot: &RunSlot) -> MutexGuard<'_, Option<ExportRun>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases the export slot when the run ends, however it ends.
struct RunGuard {
    slot: RunSlot,
}

impl RunGuard {
    fn acquire(slot: &RunSlot, cancel: CancelToken) -> HighlighterResult<Self> {
        let mut current = lock_slot(slot);
        if current.is_some() {
            return Err(HighlighterError::ExportInProgress);
        }
        *current = Some(ExportRun::new(cancel));
        Ok(Self { slot: slot.clone() })
    }

    fn update(&self, f: impl FnOnce(&mut ExportRun)) {
        if let Some(run) = lock_slot(&self.slot).as_mut() {
            f(run);
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        lock_slot(&self.slot).take();
    }
}

/// Throttled progress fan-out for one run.
struct ProgressReporter<'a> {
    guard: &'a RunGuard,
    events: Option<&'a UnboundedSender<ExportEvent>>,
    throttle: ProgressThrottle,
}

impl ProgressReporter<'_> {
    fn report(&mut self, phase: ExportPhase, done: u64, total: u64) {
        self.guard.update(|run| {
            run.phase = phase;
            if phase == ExportPhase::FrameRender {
                run.current_frame = done;
                run.total_frames = total;
            }
        });

        if !(self.throttle.should_tick() || done >= total) {
            return;
        }
        let percent = if total == 0 {
            100.0
        } else {
            (done as f64 / total as f64 * 100.0).min(100.0)
        };
        tracing::debug!(phase = ?phase, done, total, "Export progress");
        if let Some(events) = self.events {
            let _ = events.send(ExportEvent::Progress(ExportProgress {
                phase,
                frame: done,
                total_frames: total,
                percent,
            }));
        }
    }
}

fn checkpoint(cancel: &CancelToken) -> HighlighterResult<()> {
    if cancel.is_cancelled() {
        Err(HighlighterError::Canceled)
    } else {
        Ok(())
    }
}

/// Next frame of `clip`, abandoned as soon as `cancel` fires so a stalled
/// decoder cannot hold the run open.
async fn read_or_cancel(clip: &mut RenderingClip, cancel: &CancelToken) -> HighlighterResult<bool> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HighlighterError::Canceled),
        read = clip.read_frame() => read,
    }
}

/// Renders export requests. Holds the exclusive export slot.
#[derive(Debug, Clone)]
pub struct RenderPipeline {
    transcoder: Transcoder,
    work_root: PathBuf,
    slot: RunSlot,
    use_gpu: bool,
    gpu: Arc<OnceCell<Option<Arc<GpuContext>>>>,
}

impl RenderPipeline {
    pub fn new(transcoder: Transcoder) -> Self {
        Self {
            transcoder,
            work_root: std::env::temp_dir(),
            slot: Arc::new(Mutex::new(None)),
            use_gpu: true,
            gpu: Arc::new(OnceCell::new()),
        }
    }

    /// Whether transitions may run on the GPU. The device is opened on the
    /// first export that needs it and kept for the pipeline's lifetime.
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    async fn gpu_context(&self) -> Option<Arc<GpuContext>> {
        if !self.use_gpu {
            return None;
        }
        self.gpu.get_or_init(GpuContext::acquire).await.clone()
    }

    /// Directory under which per-run intermediates are created.
    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    /// Snapshot of the active run, if any.
    pub fn active_run(&self) -> Option<ExportRun> {
        lock_slot(&self.slot).clone()
    }

    /// Request cancellation of the active run, if any.
    pub fn cancel_active(&self) {
        if let Some(run) = lock_slot(&self.slot).as_ref() {
            run.cancel.cancel();
        }
    }

    /// Run one export to completion.
    ///
    /// Returns `Err(ExportInProgress)` if another export is running; every
    /// other ending is reported through [`ExportOutcome`].
    pub async fn start_rendering(
        &self,
        request: &ExportRequest,
        cancel: CancelToken,
        events: Option<UnboundedSender<ExportEvent>>,
    ) -> HighlighterResult<ExportOutcome> {
        let guard = RunGuard::acquire(&self.slot, cancel.clone())?;
        let started = Instant::now();
        let work_dir = self.work_root.join(format!(
            "highlighter-export-{}-{}",
            std::process::id(),
            unique_suffix()
        ));

        tracing::info!(
            output = %request.output_path.display(),
            clips = request.clips.len(),
            transition = %request.transition.kind,
            width = request.options.width,
            height = request.options.height,
            fps = request.options.fps,
            preview = request.preview,
            "Starting export"
        );

        let mut reporter = ProgressReporter {
            guard: &guard,
            events: events.as_ref(),
            throttle: ProgressThrottle::new(PROGRESS_INTERVAL),
        };
        let mut clips = self.live_clips(request);
        let result = self
            .run(request, &mut clips, &work_dir, &cancel, &mut reporter)
            .await;

        for clip in clips.iter_mut() {
            clip.dispose().await;
        }
        remove_work_dir(&work_dir);

        let (outcome, frames) = match result {
            Ok(frames) => (ExportOutcome::Exported, frames),
            Err(err) if err.is_canceled() => (ExportOutcome::Canceled, 0),
            Err(err) => (ExportOutcome::Failed(err.to_string()), 0),
        };
        guard.update(|run| run.error = outcome.error().map(str::to_string));

        let metrics = ExportMetrics {
            clip_count: clips.iter().filter(|c| !c.is_deleted()).count(),
            transition_type: request.transition.kind.to_string(),
            transition_duration_secs: request.transition.effective_duration_secs(),
            width: request.options.width,
            height: request.options.height,
            fps: request.options.fps,
            preview: request.preview,
            elapsed_secs: started.elapsed().as_secs_f64(),
            frames,
            outcome: outcome.label(),
        };
        match &outcome {
            ExportOutcome::Exported => tracing::info!(
                output = %request.output_path.display(),
                frames,
                elapsed_secs = metrics.elapsed_secs,
                "Export finished"
            ),
            ExportOutcome::Canceled => tracing::info!("Export canceled"),
            ExportOutcome::Failed(message) => tracing::error!(error = %message, "Export failed"),
        }
        if let Some(events) = &events {
            let _ = events.send(ExportEvent::Finished(metrics));
        }

        Ok(outcome)
    }

    fn live_clips(&self, request: &ExportRequest) -> Vec<RenderingClip> {
        request
            .clips
            .iter()
            .cloned()
            .filter_map(|mut clip| {
                if clip.refresh_deleted() {
                    tracing::warn!(path = %clip.source_path.display(), "Skipping deleted clip");
                    None
                } else {
                    Some(RenderingClip::new(clip, self.transcoder.clone()))
                }
            })
            .collect()
    }

    async fn run(
        &self,
        request: &ExportRequest,
        clips: &mut Vec<RenderingClip>,
        work_dir: &Path,
        cancel: &CancelToken,
        reporter: &mut ProgressReporter<'_>,
    ) -> HighlighterResult<u64> {
        checkpoint(cancel)?;
        request
            .options
            .validate()
            .map_err(|e| HighlighterError::config(e.to_string()))?;
        std::fs::create_dir_all(work_dir)?;

        pmap(
            clips.iter().collect::<Vec<_>>(),
            default_concurrency(),
            |clip| clip.init(),
            |_, _| {},
        )
        .await?;
        clips.retain(|clip| !clip.is_deleted());
        if clips.is_empty() {
            return Err(HighlighterError::Other(anyhow::anyhow!(
                "No clips available to export"
            )));
        }

        let options = request.options;
        let trimmed: Vec<f64> = clips
            .iter()
            .map(|clip| clip.trimmed_duration_secs().unwrap_or(0.0))
            .collect();
        let plan = FramePlan::new(
            &trimmed,
            request.transition.effective_duration_secs(),
            options.fps,
        );
        for (index, clip) in clips.iter_mut().enumerate() {
            clip.reset(&options, work_dir.join(format!("clip-{index}.flac")))
                .await?;
        }
        tracing::info!(
            clips = clips.len(),
            total_frames = plan.total_frames(),
            duration_secs = plan.total_duration_secs(),
            "Export planned"
        );

        checkpoint(cancel)?;
        let audio_path = self
            .mix_audio(request, clips, &plan, work_dir, reporter)
            .await?;

        checkpoint(cancel)?;
        let mut writer = ProcessFrameWriter::new(
            self.transcoder.clone(),
            &request.output_path,
            audio_path,
            options,
            plan.total_duration_secs(),
        );
        let rendered = self
            .render_frames(
                clips,
                &plan,
                &request.transition,
                &options,
                &mut writer,
                cancel,
                reporter,
            )
            .await;
        match rendered {
            Ok(frames) => {
                writer.end().await?;
                Ok(frames)
            }
            Err(err) => {
                writer.abort().await;
                Err(err)
            }
        }
    }

    async fn mix_audio(
        &self,
        request: &ExportRequest,
        clips: &[RenderingClip],
        plan: &FramePlan,
        work_dir: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> HighlighterResult<PathBuf> {
        tracing::info!(phase = ?ExportPhase::AudioMix, "Export phase started");
        let sources: Vec<AudioSource> = clips
            .iter()
            .filter_map(|clip| clip.audio_source().cloned())
            .collect();
        let total = sources.len() as u64;
        reporter.report(ExportPhase::AudioMix, 0, total);

        let result = self
            .build_audio_track(request, &sources, plan, work_dir, reporter)
            .await;

        for source in &sources {
            remove_file_quietly(source.output_path());
        }
        result
    }

    async fn build_audio_track(
        &self,
        request: &ExportRequest,
        sources: &[AudioSource],
        plan: &FramePlan,
        work_dir: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> HighlighterResult<PathBuf> {
        let transcoder = &self.transcoder;
        let total = sources.len() as u64;
        pmap(
            sources.iter().collect::<Vec<_>>(),
            default_concurrency(),
            |source| source.extract(transcoder),
            |_, done| reporter.report(ExportPhase::AudioMix, done as u64, total),
        )
        .await?;

        let crossfaded = work_dir.join("crossfaded.flac");
        AudioCrossfader::new(
            sources.iter().map(|s| s.output_path().to_path_buf()).collect(),
            plan.overlaps_secs(),
            &crossfaded,
        )
        .crossfade(transcoder)
        .await?;

        let Some((music, volume)) = request.audio.music_track() else {
            return Ok(crossfaded);
        };
        let mixed = work_dir.join("mixed.flac");
        AudioMixer::new(
            vec![
                MixInput::new(&crossfaded, 1.0),
                MixInput::new(music, volume).looped(),
            ],
            &mixed,
        )
        .mix(transcoder)
        .await?;
        Ok(mixed)
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_frames(
        &self,
        clips: &mut [RenderingClip],
        plan: &FramePlan,
        transition: &TransitionSpec,
        options: &ExportOptions,
        writer: &mut ProcessFrameWriter,
        cancel: &CancelToken,
        reporter: &mut ProgressReporter<'_>,
    ) -> HighlighterResult<u64> {
        tracing::info!(phase = ?ExportPhase::FrameRender, "Export phase started");
        let total = plan.total_frames();
        let gpu = if plan.clip_count() > 1 && transition.kind != TransitionType::None {
            self.gpu_context().await
        } else {
            None
        };
        let mut rng = StdRng::from_entropy();
        let mut written = 0u64;

        for index in 0..clips.len() {
            for _ in 0..plan.solo_frames(index) {
                checkpoint(cancel)?;
                let clip = &mut clips[index];
                if !read_or_cancel(clip, cancel).await? {
                    break;
                }
                writer.write_next_frame(clip.frame()).await?;
                written += 1;
                reporter.report(ExportPhase::FrameRender, written, total);
            }

            let steps = plan.outgoing_frames(index);
            if steps > 0 && index + 1 < clips.len() {
                if let Some(mut transitioner) =
                    Transitioner::for_boundary(transition, options, gpu.as_ref(), &mut rng)
                {
                    tracing::debug!(
                        boundary = index,
                        transition = %transitioner.kind(),
                        frames = steps,
                        gpu = transitioner.is_gpu(),
                        "Rendering transition"
                    );
                    let (head, tail) = clips.split_at_mut(index + 1);
                    let (from, to) = (&mut head[index], &mut tail[0]);
                    for step in 0..steps {
                        checkpoint(cancel)?;
                        let has_from = read_or_cancel(from, cancel).await?;
                        let has_to = read_or_cancel(to, cancel).await?;
                        let frame = match (has_from, has_to) {
                            (true, true) => transitioner.render(
                                from.frame(),
                                to.frame(),
                                transition_progress(step, steps),
                            )?,
                            (true, false) => from.frame(),
                            (false, true) => to.frame(),
                            (false, false) => break,
                        };
                        writer.write_next_frame(frame).await?;
                        written += 1;
                        reporter.report(ExportPhase::FrameRender, written, total);
                    }
                }
            }

            clips[index].dispose().await;
        }

        if written != total {
            tracing::warn!(written, planned = total, "Frame count differs from plan");
        }
        Ok(written)
    }
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new(Transcoder::default())
    }
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

fn remove_file_quietly(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove intermediate");
        }
    }
}

fn remove_work_dir(path: &Path) {
    if let Err(err) = std::fs::remove_dir_all(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "Failed to remove export work dir");
        }
    }
}
