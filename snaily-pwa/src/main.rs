//! Snaily companion - main entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snaily_common::config::{default_config_file, ensure_root_folder, resolve_root_folder};
use snaily_pwa::api::{self, AppContext};
use snaily_pwa::{Companion, Config};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for snaily-pwa
#[derive(Parser, Debug)]
#[command(name = "snaily-pwa")]
#[command(about = "Offline companion for the Snaily phonics cards")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "SNAILY_PORT")]
    port: Option<u16>,

    /// Folder holding the database (falls back to SNAILY_ROOT_FOLDER)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Upstream origin serving the card app and audio
    #[arg(short, long, env = "SNAILY_UPSTREAM")]
    upstream: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "SNAILY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_file);
    let mut config =
        Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(upstream) = args.upstream.clone() {
        config.upstream = upstream;
        config.validate().context("Invalid upstream")?;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let toml_root = config
        .root_folder
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    let root_folder = resolve_root_folder(
        args.root_folder.as_deref(),
        "SNAILY_ROOT_FOLDER",
        toml_root.as_deref(),
    );
    let root_folder = match ensure_root_folder(&root_folder) {
        Ok(root) => root,
        Err(e) => {
            // The companion still runs without durable storage
            warn!("{}", e);
            root_folder
        }
    };

    info!("Starting Snaily companion on port {}", config.port);
    info!("Root folder: {}", root_folder.display());
    info!("Upstream: {}", config.upstream_origin());
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let port = config.port;
    let companion = Arc::new(
        Companion::open(config, &root_folder)
            .await
            .context("Failed to initialize companion")?,
    );
    companion.start().await.context("Failed to start companion")?;

    let ctx = AppContext {
        companion: Arc::clone(&companion),
    };
    let served = api::run(ctx, port, shutdown_signal()).await;

    companion.shutdown().await;
    served.context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
