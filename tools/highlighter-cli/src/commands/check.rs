//! Check external tool availability.

use highlighter_common::config::AppConfig;
use highlighter_common::process::resolve_binary;
use highlighter_detector::DetectorUpdater;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Highlighter System Check");
    println!("{}", "=".repeat(50));

    let mut ready = true;
    for (name, path) in [
        ("ffmpeg", &config.transcoder.ffmpeg_path),
        ("ffprobe", &config.transcoder.ffprobe_path),
    ] {
        match resolve_binary(path) {
            Some(found) => println!("[OK] {name}: {}", found.display()),
            None => {
                ready = false;
                println!("[MISSING] {name}: {} not found", path.display());
            }
        }
    }

    let updater = DetectorUpdater::from_config(&config.detector);
    let paths = updater.paths();
    if paths.is_installed() {
        let manifest = updater.installed_manifest()?;
        let version = manifest
            .as_ref()
            .map(|m| m.version.as_str())
            .unwrap_or("unknown");
        println!("[OK] Detector {version}: {}", paths.executable().display());
        if let Some(published) = manifest.as_ref().and_then(|m| m.published_at()) {
            println!("     released {}", published.format("%Y-%m-%d"));
        }
    } else {
        println!(
            "[WARN] Detector not installed at {} (run `highlighter update`)",
            paths.root().display()
        );
    }

    println!();
    if ready {
        println!("Rendering and cutting are available.");
    } else {
        println!("Some required tools are missing. Set their paths in the config file.");
    }

    Ok(())
}
