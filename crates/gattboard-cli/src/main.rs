//! gattboard - publish a refreshed JSON snapshot over BLE GATT

use anyhow::Context;
use clap::Parser;
use gattboard_core::StopSignal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gattboard_cli::{
    cli::{Cli, Commands},
    config::{example_config, ConfigLoader, Overrides},
    GattboardApp,
};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    let code = match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn execute(cli: Cli) -> anyhow::Result<i32> {
    match cli.command() {
        Commands::ExampleConfig => {
            print!("{}", example_config());
            Ok(0)
        }
        Commands::Run { dry_run, interval } => {
            let app = build_app(&cli, interval)?;
            let stop = app.stop_signal();
            spawn_signal_handler(stop.clone());

            match app.run(stop, dry_run).await {
                Ok(exit) => {
                    info!("gattboard exited after {} cycles", exit.cycles);
                    Ok(exit.exit_code())
                }
                Err(e) => {
                    error!("{}", e);
                    Ok(e.exit_code())
                }
            }
        }
        Commands::Refresh => {
            let app = build_app(&cli, None)?;
            let report = app.refresh_once().await.context("Refresh failed")?;
            println!("{}", report.to_json()?);
            Ok(0)
        }
    }
}

fn build_app(cli: &Cli, interval: Option<u64>) -> anyhow::Result<GattboardApp> {
    let loader = load_configuration(cli, interval);
    let config = loader.load().context("Invalid configuration")?;
    Ok(GattboardApp::new(config))
}

/// Setup logging based on verbosity level; `RUST_LOG` takes precedence
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

/// Build the configuration loader from command line options
fn load_configuration(cli: &Cli, interval: Option<u64>) -> ConfigLoader {
    let overrides = Overrides {
        endpoint: cli.endpoint.clone(),
        refresh_interval_secs: interval,
    };
    let mut loader = ConfigLoader::new().with_overrides(overrides);
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }

    match loader.source_file() {
        Some(path) => info!("Loading configuration from: {}", path.display()),
        None => info!("Using default configuration"),
    }
    loader
}

/// Set the stop signal on SIGINT or SIGTERM
fn spawn_signal_handler(stop: StopSignal) {
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("Shutdown requested, finishing current cycle");
        stop.set();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
    }
}
