//! CanSat Web - HTTP adapter for the gateway snapshot
//!
//! Serves the latest telemetry snapshot as JSON and the built front end as
//! static files. Reads the same configuration file as `cansat-gateway` so
//! both processes agree on the snapshot path.
//!
//! # Usage
//!
//! ```bash
//! # Start on the configured address (default 0.0.0.0:5000)
//! cansat-web --config /etc/cansat/gateway.toml
//!
//! # Custom port and front-end build directory
//! cansat-web --port 8080 --static-dir ./frontend/dist
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cansat_gateway::config::Config;
use cansat_gateway::logging;
use cansat_gateway::shutdown::{self, Shutdown};
use cansat_gateway::store::SnapshotStore;
use cansat_gateway::web::{build_router, AppState};

/// CanSat telemetry HTTP server
#[derive(Parser, Debug)]
#[command(name = "cansat-web")]
#[command(about = "Serve the latest CanSat telemetry snapshot and the web front end")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Front-end build directory
    #[arg(long)]
    static_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(args.config.as_ref())?;
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if let Some(bind) = args.bind {
        config.http.bind = bind;
    }
    if let Some(static_dir) = args.static_dir {
        config.http.static_dir = static_dir;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    let _log_guard = logging::init(&config.logging, "cansat-web.log")?;

    let state = Arc::new(AppState::new(
        SnapshotStore::new(&config.snapshot.path),
        &config.http.static_dir,
    ));
    let app = build_router(state);

    let addr = format!("{}:{}", config.http.bind, config.http.port);
    info!("CanSat Web v{}", env!("CARGO_PKG_VERSION"));
    info!("Frontend: http://{}/", addr);
    info!("API: http://{}/api/cansat_data", addr);
    info!("Snapshot file: {}", config.snapshot.path);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let (trigger, stop) = Shutdown::new();
    if let Err(e) = shutdown::listen_for_signals(trigger) {
        warn!("Signal handlers unavailable, shutting down: {}", e);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::requested(stop))
        .await
        .context("server error")?;

    info!("CanSat Web stopped");
    Ok(())
}
