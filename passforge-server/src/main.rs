//! PassForge Server
//!
//! Serves signed wallet pass bundles to devices and tracks which devices
//! want push updates for which passes. Publishing happens elsewhere (see
//! the `passforge` CLI); this process only reads bundles and manages
//! registrations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use passforge_core::services::{open_blob_store, open_registry};
use passforge_core::ServiceConfig;
use passforge_server::rate_limit::spawn_prune_task;
use passforge_server::{build_router, AppState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "passforge-server", about = "PassForge wallet pass web service")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "passforge.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        ServiceConfig::load(&cli.config)?
    } else {
        tracing::info!("No config file found, using defaults");
        ServiceConfig::default()
    };

    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        cfg.database_path = database;
    }

    tracing::info!("Starting PassForge server on {}", cfg.listen_addr);

    let registry = open_registry(&cfg)?;
    let blobs = open_blob_store(&cfg)?;
    let state = AppState::new(registry, blobs, &cfg);
    spawn_prune_task(state.log_limiter.clone(), Duration::from_secs(300));
    let app = build_router(state, cfg.max_payload_size);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
