use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use clap::Parser;
use server_watchdog::{
    Probes, Watchdog,
    api::{ApiConfig, spawn_api_server},
    config::read_config_file,
    engine::Shutdown,
    util::get_settings_path,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Watches processes, disks, web sites and TCP ports")]
struct Args {
    /// Settings file (defaults to $WATCHDOG_SETTINGS)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("server_watchdog", level),
        ("tower_http", LevelFilter::INFO),
        ("axum", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let settings = args
        .settings
        .or_else(|| get_settings_path().map(PathBuf::from))
        .ok_or_else(|| anyhow!("no settings file given (use --settings or WATCHDOG_SETTINGS)"))?;
    let base_dir = settings
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let probes = Probes::default();
    let config = read_config_file(&settings)?
        .resolve(&base_dir, probes.disks.as_ref())
        .with_context(|| format!("invalid settings in {}", settings.display()))?;
    let api_config = ApiConfig::from(&config.server);

    let mut watchdog = Watchdog::start_with(config, probes).await?;
    watchdog.run().await;

    let api_shutdown = Shutdown::new();
    if let Err(e) = spawn_api_server(api_config, watchdog.api_state(), api_shutdown.clone()).await {
        error!("failed to start API server: {e:#}");
        watchdog.stop().await;
        return Err(e);
    }

    wait_for_signal().await;
    info!("shutting down");

    api_shutdown.trigger();
    watchdog.stop().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("failed to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("failed to listen for ctrl-c: {e}");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}
