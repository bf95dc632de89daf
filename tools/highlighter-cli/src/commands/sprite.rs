//! Write a scrubbing sprite for one clip.

use std::path::PathBuf;

use highlighter_common::config::AppConfig;
use highlighter_project_model::{Clip, ExportOptions};
use highlighter_render_engine::{RenderingClip, Transcoder};

pub async fn run(
    config: &AppConfig,
    clip: PathBuf,
    output: PathBuf,
    start_trim: f64,
    end_trim: f64,
) -> anyhow::Result<()> {
    let clip = Clip::new(&clip).with_trims(start_trim, end_trim);
    let rendering = RenderingClip::new(clip, Transcoder::from_config(&config.transcoder));
    rendering
        .export_scrubbing_sprite(&ExportOptions::preview(), &output)
        .await?;
    println!("Sprite written to {}", output.display());
    Ok(())
}
