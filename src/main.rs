//! Motion detection pipeline: capture -> analysis -> presentation

use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use motion_pipeline::capture::{open_source, SourceOpener};
use motion_pipeline::display::{FrameSink, HeadlessDisplay, SinkFactory};
use motion_pipeline::pipeline::StageKind;
use motion_pipeline::{Config, OverlayMode, Pipeline};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Video file or directory of still images
    video_path: PathBuf,
    /// Log measured capture FPS once per interval
    #[arg(long)]
    fps_debug: bool,
    /// Outline detections with rectangles instead of contours
    #[arg(long)]
    bounding_boxes: bool,
    /// Run without a window
    #[arg(long)]
    headless: bool,
    /// Leave detected regions unblurred
    #[arg(long)]
    no_blur: bool,
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("motion_pipeline=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();
    let config = apply_cli(Config::load(cli.config.as_deref())?, &cli);

    info!("Motion pipeline launching on {}", cli.video_path.display());

    let path = cli.video_path.clone();
    let fps = config.capture.image_sequence_fps;
    let opener: SourceOpener = Box::new(move || open_source(&path, fps));

    let pipeline = Pipeline::standard(&config, opener, sink_factory(&config))?;
    let report = pipeline
        .run(async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("Ctrl+C handler unavailable");
                std::future::pending::<()>().await;
            }
        })
        .await;

    for kind in report.abandoned() {
        warn!("{} stage did not stop in time", kind);
    }
    info!(
        "Pipeline finished: captured {}, analyzed {}, displayed {}",
        report.frames(StageKind::Capture).unwrap_or(0),
        report.frames(StageKind::Analysis).unwrap_or(0),
        report.frames(StageKind::Presentation).unwrap_or(0),
    );

    if let Some((kind, e)) = report.failures().next() {
        return Err(eyre!("{} stage failed: {}", kind, e));
    }
    Ok(())
}

fn apply_cli(mut config: Config, cli: &Cli) -> Config {
    config.capture.fps_debug |= cli.fps_debug;
    config.display.headless |= cli.headless;
    if cli.bounding_boxes {
        config.display.overlay = OverlayMode::BoundingBoxes;
    }
    if cli.no_blur {
        config.display.blur_detections = false;
    }
    config
}

#[cfg(feature = "sdl-display")]
fn sink_factory(config: &Config) -> SinkFactory {
    if config.display.headless {
        return Box::new(|| Ok(Box::new(HeadlessDisplay::new()) as Box<dyn FrameSink>));
    }
    let title = config.display.window_title.clone();
    Box::new(move || {
        let display = motion_pipeline::display::Sdl2Display::new(title)?;
        Ok(Box::new(display) as Box<dyn FrameSink>)
    })
}

#[cfg(not(feature = "sdl-display"))]
fn sink_factory(config: &Config) -> SinkFactory {
    if !config.display.headless {
        warn!("Built without a window backend, running headless");
    }
    Box::new(|| Ok(Box::new(HeadlessDisplay::new()) as Box<dyn FrameSink>))
}
