//! Highlighter CLI: detect, cut, and render highlight reels.
//!
//! Usage:
//!   highlighter detect <VIDEO>                 Find highlights in a recording
//!   highlighter cut <VIDEO> <HIGHLIGHTS>       Cut highlights into clips
//!   highlighter export <REQUEST>               Render clips into one video
//!   highlighter sprite <CLIP> <OUTPUT>         Write a scrubbing thumbnail strip
//!   highlighter update                         Install the latest detector
//!   highlighter check                          Check external tools

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use highlighter_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "highlighter",
    about = "Automatic highlight detection and highlight reel rendering",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the highlight detector over a recording
    Detect {
        /// Recording to analyse
        video: PathBuf,

        /// Milestones file passed through to the detector
        #[arg(long)]
        milestones: Option<PathBuf>,

        /// Where to write the highlights (JSON); stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cut detected highlights out of a recording
    Cut {
        /// Source recording
        video: PathBuf,

        /// Highlights JSON produced by `detect`
        highlights: PathBuf,

        /// Directory for the cut clips
        #[arg(short, long, default_value = "highlights")]
        output_dir: PathBuf,

        /// Seconds of padding around each highlight
        #[arg(long)]
        padding: Option<f64>,

        /// Concurrent cuts
        #[arg(long)]
        concurrency: Option<usize>,

        /// Also write an export request covering the cut clips
        #[arg(long)]
        request: Option<PathBuf>,
    },

    /// Render an export request (JSON) into a single video
    Export {
        /// Export request file
        request: PathBuf,

        /// Override the output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fast 720p preview render
        #[arg(long)]
        preview: bool,
    },

    /// Write a scrubbing sprite for one clip
    Sprite {
        /// Clip file
        clip: PathBuf,

        /// Output image
        output: PathBuf,

        /// Seconds trimmed from the start
        #[arg(long, default_value = "0")]
        start_trim: f64,

        /// Seconds trimmed from the end
        #[arg(long, default_value = "0")]
        end_trim: f64,
    },

    /// Install or update the highlight detector
    Update {
        /// Only report whether an update is available
        #[arg(long)]
        check_only: bool,
    },

    /// Check that external tools are available
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    highlighter_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Detect {
            video,
            milestones,
            output,
        } => commands::detect::run(&config, video, milestones, output).await,
        Commands::Cut {
            video,
            highlights,
            output_dir,
            padding,
            concurrency,
            request,
        } => {
            if let Some(padding) = padding {
                config.cutter.padding_secs = padding;
            }
            if let Some(concurrency) = concurrency {
                config.cutter.concurrency = concurrency;
            }
            commands::cut::run(&config, video, highlights, output_dir, request).await
        }
        Commands::Export {
            request,
            output,
            preview,
        } => commands::export::run(&config, request, output, preview).await,
        Commands::Sprite {
            clip,
            output,
            start_trim,
            end_trim,
        } => commands::sprite::run(&config, clip, output, start_trim, end_trim).await,
        Commands::Update { check_only } => commands::update::run(&config, check_only).await,
        Commands::Check => commands::check::run(&config),
    }
}
