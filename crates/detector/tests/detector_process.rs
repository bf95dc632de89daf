//! Detector runs against stand-in shell scripts.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use highlighter_common::cancel::CancelToken;
use highlighter_common::error::HighlighterError;
use highlighter_detector::{DetectorEvent, HighlightDetector};
use highlighter_project_model::Highlight;

const START: &str = "<<<HL_START>>>";
const END: &str = "<<<HL_END>>>";

fn detector(dir: &Path, body: &str) -> HighlightDetector {
    let path = dir.join("detector");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    HighlightDetector::new(path, "/opt/ffmpeg/bin/ffmpeg", START, END)
}

fn emit(json: &str) -> String {
    format!("printf '%s\\n' '{START}{json}{END}'")
}

#[tokio::test]
async fn test_reports_progress_milestones_and_highlights() {
    let dir = tempfile::tempdir().unwrap();
    let args_file = dir.path().join("args.txt");
    let body = [
        format!("echo \"$@\" > '{}'", args_file.display()),
        "echo 'loading model'".to_string(),
        format!("printf '%s' '{START}{{\"type\":\"progress\",\"pro'"),
        "sleep 0.1".to_string(),
        format!("printf '%s\\n' 'gress\":0.5}}{END}'"),
        emit(r#"{"type":"milestone","name":"round_start","time":12}"#),
        emit("garbage"),
        emit(r#"{"type":"highlights","highlights":[{"start_time":5.0,"end_time":9.5,"score":0.9}]}"#),
        "echo 'bye'".to_string(),
    ]
    .join("\n");
    let detector = detector(dir.path(), &body);

    let mut events = Vec::new();
    let highlights = detector
        .detect(
            Path::new("/rec/match.mp4"),
            Some(Path::new("/rec/milestones.json")),
            &CancelToken::new(),
            |event| events.push(event),
        )
        .await
        .unwrap();

    let mut expected = Highlight::new(5.0, 9.5);
    expected.score = 0.9;
    assert_eq!(highlights, vec![expected]);

    assert_eq!(events.len(), 2);
    assert_eq!(events[0], DetectorEvent::Progress(0.5));
    match &events[1] {
        DetectorEvent::Milestone(m) => assert_eq!(m.name(), Some("round_start")),
        other => panic!("unexpected {other:?}"),
    }

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.trim(),
        "/rec/match.mp4 --milestones /rec/milestones.json --ffmpeg /opt/ffmpeg/bin/ffmpeg"
    );
}

#[tokio::test]
async fn test_nonzero_exit_is_process_error() {
    let dir = tempfile::tempdir().unwrap();
    let detector = detector(
        dir.path(),
        &format!("{}\necho 'model missing' >&2\nexit 3", emit(r#"{"type":"progress","progress":0.1}"#)),
    );

    let err = detector
        .detect(Path::new("rec.mp4"), None, &CancelToken::new(), |_| {})
        .await
        .unwrap_err();

    match err {
        HighlighterError::DetectorProcess { exit_code, signal } => {
            assert_eq!(exit_code, Some(3));
            assert_eq!(signal, None);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_crash_by_signal_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let detector = detector(dir.path(), "kill -9 $$");

    let err = detector
        .detect(Path::new("rec.mp4"), None, &CancelToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(!err.is_canceled());
    match err {
        HighlighterError::DetectorProcess { exit_code, signal } => {
            assert_eq!(exit_code, None);
            assert_eq!(signal, Some(9));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_clean_exit_without_highlights_fails() {
    let dir = tempfile::tempdir().unwrap();
    let detector = detector(dir.path(), "echo 'nothing found'");

    let err = detector
        .detect(Path::new("rec.mp4"), None, &CancelToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(err.to_string().contains("without reporting highlights"));
}

#[tokio::test]
async fn test_highlights_resolve_without_waiting_for_exit() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("lingering.pid");
    let body = format!(
        "sleep 30 &\necho $! > '{}'\n{}\nsleep 30",
        pid_file.display(),
        emit(r#"{"type":"highlights","highlights":[{"start_time":1.0,"end_time":4.0,"score":0.5}]}"#)
    );
    let detector = detector(dir.path(), &body);

    let started = std::time::Instant::now();
    let highlights = tokio::time::timeout(
        Duration::from_secs(5),
        detector.detect(Path::new("rec.mp4"), None, &CancelToken::new(), |_| {}),
    )
    .await
    .expect("highlights should resolve detection")
    .unwrap();

    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].start_time, 1.0);
    assert!(started.elapsed() < Duration::from_secs(5));

    let helper = std::fs::read_to_string(&pid_file).unwrap();
    assert!(wait_dead(helper.trim()).await, "detector child outlived detection");
}

/// Whether `pid` is gone or only a zombie awaiting its reaper.
fn is_dead(pid: &str) -> bool {
    let stat = PathBuf::from(format!("/proc/{pid}/stat"));
    if cfg!(target_os = "linux") {
        match std::fs::read_to_string(stat) {
            Err(_) => true,
            Ok(content) => content
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
        }
    } else {
        !std::process::Command::new("sh")
            .args(["-c", &format!("kill -0 {pid}")])
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
            .success()
    }
}

async fn wait_dead(pid: &str) -> bool {
    for _ in 0..40 {
        if is_dead(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_cancel_kills_whole_process_tree() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let body = format!(
        "sleep 60 &\necho $! > '{}'\n{}\nsleep 60",
        pid_file.display(),
        emit(r#"{"type":"progress","progress":0.01}"#)
    );
    let detector = detector(dir.path(), &body);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        detector.detect(Path::new("rec.mp4"), None, &cancel, move |event| {
            if matches!(event, DetectorEvent::Progress(_)) {
                trigger.cancel();
            }
        }),
    )
    .await
    .expect("cancellation should end detection");

    let err = result.unwrap_err();
    assert!(err.is_canceled());

    let helper = std::fs::read_to_string(&pid_file).unwrap();
    let helper = helper.trim();
    assert!(wait_dead(helper).await, "helper {helper} survived cancellation");
}
