//! Running the highlight detector as a subprocess.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;

use highlighter_common::cancel::CancelToken;
use highlighter_common::config::AppConfig;
use highlighter_common::error::{HighlighterError, HighlighterResult};
use highlighter_common::process::{
    configure_command, drain_stderr, isolate_process_group, kill_process_tree,
};
use highlighter_project_model::Highlight;

use crate::paths::DetectorPaths;
use crate::protocol::{DetectorMessage, MessageFramer, Milestone};

const READ_CHUNK: usize = 8 * 1024;

/// Intermediate output forwarded while detection runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    Progress(f64),
    Milestone(Milestone),
}

/// Drives the external detector over a recording.
///
/// The detector is invoked as
/// `<exe> <video> [--milestones <file>] --ffmpeg <path>` and reports over
/// framed JSON on stdout (see [`crate::protocol`]).
#[derive(Debug, Clone)]
pub struct HighlightDetector {
    binary: PathBuf,
    ffmpeg: PathBuf,
    start_token: String,
    end_token: String,
}

impl HighlightDetector {
    pub fn new(
        binary: impl Into<PathBuf>,
        ffmpeg: impl Into<PathBuf>,
        start_token: impl Into<String>,
        end_token: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            ffmpeg: ffmpeg.into(),
            start_token: start_token.into(),
            end_token: end_token.into(),
        }
    }

    /// Detector from the installed location and configured tokens.
    pub fn from_config(config: &AppConfig) -> Self {
        let paths = DetectorPaths::new(&config.detector.install_root);
        Self::new(
            paths.executable(),
            &config.transcoder.ffmpeg_path,
            &config.detector.start_token,
            &config.detector.end_token,
        )
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn is_installed(&self) -> bool {
        self.binary.is_file()
    }

    fn args(&self, video: &Path, milestones: Option<&Path>) -> Vec<String> {
        let mut args = vec![video.to_string_lossy().into_owned()];
        if let Some(file) = milestones {
            args.push("--milestones".to_string());
            args.push(file.to_string_lossy().into_owned());
        }
        args.push("--ffmpeg".to_string());
        args.push(self.ffmpeg.to_string_lossy().into_owned());
        args
    }

    /// Analyse `video` and return its highlights.
    ///
    /// Resolves on the first `highlights` message; the detector and its
    /// children are killed at that point rather than awaited.
    /// Cancelling `cancel` kills the detector and everything it spawned and
    /// yields [`HighlighterError::Canceled`].
    pub async fn detect(
        &self,
        video: &Path,
        milestones: Option<&Path>,
        cancel: &CancelToken,
        mut on_event: impl FnMut(DetectorEvent),
    ) -> HighlighterResult<Vec<Highlight>> {
        if cancel.is_cancelled() {
            return Err(HighlighterError::Canceled);
        }

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(self.args(video, milestones))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        configure_command(&mut cmd);
        isolate_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                HighlighterError::FileNotFound {
                    path: self.binary.clone(),
                }
            } else {
                HighlighterError::Io(err)
            }
        })?;
        let pid = child.id().unwrap_or(0);
        tracing::info!(pid, video = %video.display(), "Detector started");

        let stderr = child.stderr.take().map(drain_stderr);
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("detector stdout was not captured"))?;

        let mut framer = MessageFramer::new(&self.start_token, &self.end_token);
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(abort(pid, &mut child).await);
                }
                read = stdout.read(&mut chunk) => read?,
            };
            if read == 0 {
                break;
            }
            if cancel.is_cancelled() {
                return Err(abort(pid, &mut child).await);
            }

            for message in framer.push(&chunk[..read]) {
                match message {
                    DetectorMessage::Progress { progress } => {
                        tracing::trace!(progress, "Detector progress");
                        on_event(DetectorEvent::Progress(progress));
                    }
                    DetectorMessage::Milestone(milestone) => {
                        tracing::debug!(name = ?milestone.name(), "Detector milestone");
                        on_event(DetectorEvent::Milestone(milestone));
                    }
                    DetectorMessage::Highlights { highlights } => {
                        tracing::info!(pid, count = highlights.len(), "Detector reported highlights");
                        shut_down(pid, &mut child).await;
                        return Ok(highlights);
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(abort(pid, &mut child).await);
            }
            status = child.wait() => status?,
        };
        let stderr_tail = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            tracing::error!(pid, stderr = %stderr_tail.trim(), "Detector exited without highlights");
            Err(anyhow::anyhow!("detector exited without reporting highlights").into())
        } else {
            let (exit_code, signal) = exit_details(&status);
            tracing::error!(pid, ?exit_code, ?signal, stderr = %stderr_tail.trim(), "Detector failed");
            Err(HighlighterError::DetectorProcess { exit_code, signal })
        }
    }
}

/// Kill the detector and whatever it spawned, then reap it.
async fn shut_down(pid: u32, child: &mut tokio::process::Child) {
    kill_process_tree(pid);
    if let Err(err) = child.kill().await {
        tracing::debug!(pid, error = %err, "Detector already gone");
    }
}

async fn abort(pid: u32, child: &mut tokio::process::Child) -> HighlighterError {
    tracing::info!(pid, "Detector canceled, killing process tree");
    shut_down(pid, child).await;
    HighlighterError::Canceled
}

fn exit_details(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_with_and_without_milestones() {
        let detector = HighlightDetector::new("/d/det", "/usr/bin/ffmpeg", "<s>", "<e>");
        assert_eq!(
            detector.args(Path::new("/v/rec.mp4"), None),
            vec!["/v/rec.mp4", "--ffmpeg", "/usr/bin/ffmpeg"]
        );
        assert_eq!(
            detector.args(Path::new("/v/rec.mp4"), Some(Path::new("/v/m.json"))),
            vec!["/v/rec.mp4", "--milestones", "/v/m.json", "--ffmpeg", "/usr/bin/ffmpeg"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_file_not_found() {
        let detector = HighlightDetector::new("/nonexistent/detector", "ffmpeg", "<s>", "<e>");
        assert!(!detector.is_installed());
        let err = detector
            .detect(Path::new("rec.mp4"), None, &CancelToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, HighlighterError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_precancelled_never_spawns() {
        let detector = HighlightDetector::new("/nonexistent/detector", "ffmpeg", "<s>", "<e>");
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = detector
            .detect(Path::new("rec.mp4"), None, &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }
}
