// asset_update - one reconciliation run over the photo and video trees
// Scans, matches variants, regenerates thumbnails, gathers video metadata, writes the update script.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use asset_update::{CancelToken, OptimizerConfig, Pipeline, PipelineConfig, RegenerateMode, SystemRunner};

#[derive(Parser)]
#[command(name = "asset_update", version, about = "Reconcile photo/video renditions and emit store updates")]
struct Args {
    /// Root of the photo tree (xs, xs_sq, sm, md, lg, prt, src)
    photo_root: PathBuf,

    /// Root of the video tree (thumbnails, thumb_sq, scaled, full, raw)
    video_root: PathBuf,

    /// Where to write the update script
    output: PathBuf,

    /// Worker threads per phase
    #[arg(long, default_value_t = 32)]
    workers: usize,

    /// Timeout for each ffmpeg/exiftool/optimizer call, in seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Thumbnail regeneration: off, missing, all
    #[arg(long, default_value = "missing")]
    regenerate: RegenerateMode,

    /// Run jpegoptim on every generated thumbnail
    #[arg(long, default_value_t = false)]
    optimize: bool,

    /// Max JPEG quality for the optimizer
    #[arg(long, default_value_t = 90)]
    max_quality: u8,

    /// Print the run summary as JSON on stdout
    #[arg(long, default_value_t = false)]
    summary_json: bool,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();

    let config = PipelineConfig {
        workers: args.workers,
        process_timeout: Duration::from_secs(args.timeout_secs),
        regenerate: args.regenerate,
        optimizer: args.optimize.then(|| OptimizerConfig {
            max_quality: args.max_quality,
            ..Default::default()
        }),
        ..PipelineConfig::new(args.photo_root, args.video_root, args.output)
    };

    config.validate().context("Invalid configuration")?;

    info!("Starting asset update");
    info!("   Photos: {}", config.photo_root.display());
    info!("   Videos: {}", config.video_root.display());
    info!("   Output: {}", config.output.display());

    let runner = SystemRunner::new(config.process_timeout)
        .context("Failed to start process runner")?;

    // Ctrl-C stops new units; in-flight ones finish or time out
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    runner.handle().spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let pipeline = Pipeline::with_runner(config, Box::new(runner), cancel)
        .context("Failed to set up pipeline")?;

    let output = pipeline.run();
    output.summary.log();

    if args.summary_json {
        let json = serde_json::to_string_pretty(&output.summary)
            .context("Failed to serialize summary")?;
        println!("{}", json);
    }

    if !output.script_written {
        warn!("No update script was written");
    }

    Ok(())
}
