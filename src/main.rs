//! CLI entry point for the capture daemons
//!
//! One binary serves both sensors:
//!
//! ```bash
//! capture_daemon camera --out /data/session_12
//! capture_daemon sonar --debug
//! ```
//!
//! The console starts the daemon as a child process and keeps its stdin open;
//! closing stdin shuts the daemon down. Logs go to stderr.

use anyhow::{Context, Result};
use capture_daemon::config::CaptureConfig;
use capture_daemon::daemon::{build_pipeline, DaemonOptions};
use capture_daemon::data::Modality;
use capture_daemon::{liveness, logging, shutdown};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sensor {
    /// RTSP video camera
    Camera,
    /// Imaging sonar
    Sonar,
}

impl From<Sensor> for Modality {
    fn from(sensor: Sensor) -> Self {
        match sensor {
            Sensor::Camera => Modality::Camera,
            Sensor::Sonar => Modality::Sonar,
        }
    }
}

#[derive(Parser)]
#[command(name = "capture_daemon")]
#[command(about = "Sensor capture daemon: record, preview and power-manage one sensor", long_about = None)]
struct Cli {
    /// Sensor to capture from
    #[arg(value_enum)]
    sensor: Sensor,

    /// Use the local test source and skip device control
    #[arg(long)]
    debug: bool,

    /// Session root directory
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Configuration file (defaults to config/capture.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = CaptureConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let options = DaemonOptions {
        modality: cli.sensor.into(),
        debug: cli.debug,
        out: cli.out,
    };
    tracing::info!(
        modality = %options.modality,
        debug = options.debug,
        out = %options.out.display(),
        "Starting capture daemon"
    );

    let pipeline = build_pipeline(&config, &options).context("Failed to assemble pipeline")?;
    tokio::spawn(shutdown::listen_for_signals(pipeline.context().run_state.clone()));

    let summary = pipeline.run(liveness::stdin_channel()).await;

    // Leave without waiting on runtime teardown: the stdin reader may still be
    // parked in a blocking read.
    std::process::exit(summary.exit_code());
}
