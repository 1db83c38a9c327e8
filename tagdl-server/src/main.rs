//! tagdl-server - audio download and tagging service
//!
//! Resolves metadata for a media URL, fetches audio from the first working
//! provider, embeds title, artist and cover art, and delivers a tagged MP3.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagdl_common::config::{resolve_config_path, RootFolderInitializer, RootFolderResolver};
use tagdl_server::config::{DeliveryMode, ServiceConfig};
use tagdl_server::services::janitor;
use tagdl_server::AppState;

const MODULE_NAME: &str = "tagdl-server";

/// Command-line arguments for tagdl-server
#[derive(Parser, Debug)]
#[command(name = "tagdl-server")]
#[command(about = "Audio download and tagging service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "TAGDL_PORT")]
    port: Option<u16>,

    /// Path to the TOML config file
    #[arg(short, long, env = "TAGDL_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for temp files and stored artifacts
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Default delivery mode: stream or handle
    #[arg(long, env = "TAGDL_DELIVERY_MODE")]
    delivery_mode: Option<DeliveryMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(MODULE_NAME, args.config.clone());
    let mut config =
        ServiceConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing; RUST_LOG wins over the config file level
    let default_filter = format!("tagdl_server={0},tagdl_common={0},tower_http=info", config.logging.level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tagdl-server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Config file: {}", path.display()),
        None => info!("No config file location, using built-in defaults"),
    }

    // Resolve root folder: CLI > env > TOML > OS default
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(args.root_folder.clone())
        .with_config_file(config_path.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    config.root_folder = Some(initializer.root_folder().to_path_buf());
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(mode) = args.delivery_mode {
        config.delivery.mode = mode;
    }
    config.validate().context("Invalid configuration")?;

    janitor::purge_temp_dir(&config.temp_dir())
        .await
        .context("Failed to purge temp directory")?;

    let state = AppState::new(config).context("Failed to build application state")?;
    info!(
        providers = ?state.sources.provider_names(),
        cover_policy = ?state.covers.policy(),
        delivery_mode = ?state.config.delivery.mode,
        "Pipeline configured"
    );

    let engine = tagdl_server::services::FfmpegEngine::new(state.config.mux.ffmpeg_path.clone());
    if !engine.is_available().await {
        tracing::warn!(
            "Transcode engine {} not available; downloads will fail until it is installed",
            state.config.mux.ffmpeg_path.display()
        );
    }

    let _expiry = janitor::spawn_artifact_expiry(
        Arc::clone(&state.store),
        state.config.artifact_ttl(),
        state.config.sweep_interval(),
    );

    let addr: SocketAddr = format!("{}:{}", state.config.bind, state.config.port)
        .parse()
        .context("Invalid bind address")?;

    let app = tagdl_server::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
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
