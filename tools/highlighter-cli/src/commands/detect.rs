//! Run the highlight detector.

use std::io::Write;
use std::path::PathBuf;

use highlighter_common::config::AppConfig;
use highlighter_detector::{DetectorEvent, HighlightDetector};

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    milestones: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let detector = HighlightDetector::from_config(config);
    if !detector.is_installed() {
        anyhow::bail!(
            "Detector not installed at {} (run `highlighter update`)",
            detector.binary().display()
        );
    }

    eprintln!("Detecting highlights in: {}", video.display());
    let cancel = super::ctrl_c_token();

    let result = detector
        .detect(&video, milestones.as_deref(), &cancel, |event| match event {
            DetectorEvent::Progress(progress) => {
                eprint!("\r  Progress: {:.1}%  ", progress * 100.0);
                let _ = std::io::stderr().flush();
            }
            DetectorEvent::Milestone(milestone) => {
                eprintln!("\n  Milestone: {}", milestone.name().unwrap_or("unnamed"));
            }
        })
        .await;

    let highlights = match result {
        Ok(highlights) => highlights,
        Err(err) if err.is_canceled() => {
            eprintln!("\nDetection canceled");
            return Ok(());
        }
        Err(err) => return Err(anyhow::anyhow!("Detection failed: {err}")),
    };

    eprintln!("\nFound {} highlights", highlights.len());
    let json = serde_json::to_string_pretty(&highlights)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("Highlights written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
