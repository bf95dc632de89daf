//! Install or update the highlight detector.

use std::io::Write;

use highlighter_common::config::AppConfig;
use highlighter_detector::{DetectorUpdater, UpdateOutcome, UpdateStep};

pub async fn run(config: &AppConfig, check_only: bool) -> anyhow::Result<()> {
    let updater = DetectorUpdater::from_config(&config.detector);

    if check_only {
        let check = updater.check().await?;
        let installed = check
            .installed
            .as_ref()
            .map(|m| m.version.as_str())
            .unwrap_or("none");
        if check.update_required {
            println!("Update available: {installed} -> {}", check.remote.version);
            if let Some(published) = check.remote.published_at() {
                println!("  Published {}", published.format("%Y-%m-%d %H:%M UTC"));
            }
        } else {
            println!("Detector {} is up to date", check.remote.version);
        }
        return Ok(());
    }

    let outcome = updater
        .ensure_current(|step| match step {
            UpdateStep::Checking => println!("Checking for detector updates..."),
            UpdateStep::UpdateNeeded { version } => println!("Installing detector {version}"),
            UpdateStep::Downloading { downloaded, total } => {
                match total {
                    Some(total) if total > 0 => print!(
                        "\r  Downloading: {:.1}%  ",
                        downloaded as f64 / total as f64 * 100.0
                    ),
                    _ => print!("\r  Downloading: {} KiB  ", downloaded / 1024),
                }
                let _ = std::io::stdout().flush();
            }
            UpdateStep::Verifying => println!("\n  Verifying checksum"),
            UpdateStep::Installing => println!("  Installing"),
            UpdateStep::UpToDate { .. } | UpdateStep::Installed { .. } => {}
        })
        .await?;

    match outcome {
        UpdateOutcome::UpToDate { version } => println!("Detector {version} is up to date"),
        UpdateOutcome::Installed { version } => println!("Detector {version} installed"),
    }
    Ok(())
}
