//! camctl — camera-recording controller
//!
//! Usage:
//!   camctl serve --config config.toml
//!   camctl status --config config.toml
//!   camctl record --config config.toml --camera camera0

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tokio_util::sync::CancellationToken;

use camctl::config::Config;
use camctl::controller::Controller;
use camctl::models::RecordingOptions;

#[derive(Parser)]
#[command(name = "camctl", about = "Camera-recording controller", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the controller and run until interrupted.
    Serve {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print a brief health/readiness snapshot and exit.
    Status {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Start a recording for one camera, wait for ctrl-c, then stop it.
    Record {
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        camera: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => run_serve(config).await,
        Command::Status { config } => run_status(config).await,
        Command::Record { config, camera } => run_record(config, &camera).await,
    }
}

async fn load_controller(config_path: PathBuf) -> Controller {
    let cfg = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    match Controller::new(&cfg) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to construct controller");
            std::process::exit(1);
        }
    }
}

async fn run_serve(config_path: PathBuf) {
    let controller = load_controller(config_path).await;
    let token = CancellationToken::new();
    controller.start(token.clone()).await;
    info!("controller started, awaiting readiness subscribers and ctrl-c");
    let _ = controller.subscribe_to_readiness(&token).await;
    info!("controller ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, shutting down"),
        Err(e) => error!(error = %e, "signal error"),
    }

    token.cancel();
    controller.stop(CancellationToken::new(), Duration::from_secs(5)).await;
}

async fn run_status(config_path: PathBuf) {
    let controller = load_controller(config_path).await;
    let token = CancellationToken::new();
    controller.start(token.clone()).await;
    let _ = controller.subscribe_to_readiness(&token).await;

    let health = controller.get_health();
    println!("=== camctl status ===");
    println!("ready       : {}", controller.is_ready());
    println!("status      : {}", health.status);
    println!("circuit     : {:?}", health.circuit);

    let storage = controller.get_storage_info();
    println!("recordings  : {}", storage.recordings_path);
    println!("snapshots   : {}", storage.snapshots_path);

    token.cancel();
    controller.stop(CancellationToken::new(), Duration::from_secs(1)).await;
}

async fn run_record(config_path: PathBuf, camera_id: &str) {
    let controller = load_controller(config_path).await;
    let token = CancellationToken::new();
    controller.start(token.clone()).await;
    let _ = controller.subscribe_to_readiness(&token).await;

    match controller.start_recording(camera_id, RecordingOptions::default(), &token).await {
        Ok(status) => info!(camera = camera_id, filename = status.filename, "recording started"),
        Err(e) => {
            error!(camera = camera_id, error = %e, "failed to start recording");
            std::process::exit(1);
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received ctrl-c, stopping recording"),
        Err(e) => error!(error = %e, "signal error"),
    }

    match controller.stop_recording(camera_id, &token).await {
        Ok(status) => info!(camera = camera_id, duration = ?status.duration_secs, "recording stopped"),
        Err(e) => error!(camera = camera_id, error = %e, "failed to stop recording"),
    }

    token.cancel();
    controller.stop(CancellationToken::new(), Duration::from_secs(5)).await;
}
