//! Render an export request to video.

use std::io::Write;
use std::path::PathBuf;

use highlighter_common::config::AppConfig;
use highlighter_project_model::{ExportOptions, ExportRequest};
use highlighter_render_engine::{ExportEvent, ExportPhase, RenderPipeline, Transcoder};

pub async fn run(
    config: &AppConfig,
    request_path: PathBuf,
    output: Option<PathBuf>,
    preview: bool,
) -> anyhow::Result<()> {
    let mut request = ExportRequest::load(&request_path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", request_path.display()))?;
    if let Some(output) = output {
        request.output_path = output;
    }
    if preview {
        request.options = ExportOptions::preview();
        request.preview = true;
    }

    println!("Exporting {} clips", request.clips.len());
    println!("  Output: {}", request.output_path.display());
    println!(
        "  Resolution: {}x{} @ {} fps ({})",
        request.options.width,
        request.options.height,
        request.options.fps,
        request.options.preset.as_str()
    );
    println!(
        "  Transition: {} ({:.1}s)",
        request.transition.kind,
        request.transition.effective_duration_secs()
    );

    let pipeline = RenderPipeline::new(Transcoder::from_config(&config.transcoder))
        .with_gpu(config.render.gpu);
    let cancel = super::ctrl_c_token();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ExportEvent::Progress(p) => {
                    let label = match p.phase {
                        ExportPhase::AudioMix => "Mixing audio",
                        ExportPhase::FrameRender => "Rendering",
                    };
                    print!(
                        "\r  {label}: {:.1}% ({}/{})  ",
                        p.percent, p.frame, p.total_frames
                    );
                    let _ = std::io::stdout().flush();
                }
                ExportEvent::Finished(metrics) => {
                    println!(
                        "\n  {} frames in {:.1}s",
                        metrics.frames, metrics.elapsed_secs
                    );
                }
            }
        }
    });

    let outcome = pipeline.start_rendering(&request, cancel, Some(tx)).await?;
    printer.await?;

    if outcome.exported() {
        println!("Export complete: {}", request.output_path.display());
        Ok(())
    } else if let Some(error) = outcome.error() {
        Err(anyhow::anyhow!("Export failed: {error}"))
    } else {
        println!("Export canceled");
        Ok(())
    }
}
