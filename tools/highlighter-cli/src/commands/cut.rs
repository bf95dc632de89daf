//! Cut highlights out of a recording.

use std::path::PathBuf;

use highlighter_common::config::AppConfig;
use highlighter_processing_core::ClipCutter;
use highlighter_project_model::{ExportRequest, Highlight, TransitionSpec};
use highlighter_render_engine::Transcoder;

pub async fn run(
    config: &AppConfig,
    video: PathBuf,
    highlights: PathBuf,
    output_dir: PathBuf,
    request: Option<PathBuf>,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(&highlights)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", highlights.display()))?;
    let highlights: Vec<Highlight> = serde_json::from_str(&content)?;

    println!("Cutting {} highlights from: {}", highlights.len(), video.display());
    let cutter = ClipCutter::new(
        Transcoder::from_config(&config.transcoder),
        &output_dir,
        &config.cutter,
    );

    let cuts = cutter
        .cut_with_progress(&video, &highlights, |done, total| {
            println!("  Cut {done}/{total}");
        })
        .await?;

    for cut in &cuts {
        println!(
            "  {:>8.2}s - {:>8.2}s  {:?}  {}",
            cut.highlight.start_time,
            cut.highlight.end_time,
            cut.mode,
            cut.output_path.display()
        );
    }
    println!("{} of {} clips written to {}", cuts.len(), highlights.len(), output_dir.display());

    if let Some(path) = request {
        let export = ExportRequest {
            clips: cuts.iter().map(|c| c.to_clip()).collect(),
            transition: TransitionSpec::default(),
            audio: Default::default(),
            options: Default::default(),
            preview: false,
            output_path: output_dir.join("highlights.mp4"),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&export)?)?;
        println!("Export request written to {}", path.display());
    }
    Ok(())
}
