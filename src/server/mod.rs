//! API server
//!
//! Serves the browser client: the remote catalog annotated with local
//! availability, scan control and the download queue.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check (including RomM reachability)
//! - `GET /api/config` - Current configuration, password masked
//! - `GET /api/platforms` - Remote platforms with local stats
//! - `GET /api/platforms/:id/roms?view=all|downloaded|available` - Annotated ROM list
//! - `GET /api/roms/:id` - One annotated ROM
//! - `POST /api/scan` - Start a local scan
//! - `GET /api/scan/status` - Scan job and inventory stats
//! - `POST /api/scan/reset` - Force the scan job idle
//! - `POST /api/download` - Queue one ROM
//! - `POST /api/download/batch` - Queue several ROMs
//! - `GET /api/queue` - Queue entries
//! - `DELETE /api/queue` - Clear finished entries
//! - `DELETE /api/queue/:id` - Dismiss one entry
//! - `GET /api/stats` - Local, remote and queue statistics
//! - `GET /api/mappings/suggest` - Suggested platform mapping
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use romsync::config::Config;
//! use romsync::inventory::LocalInventory;
//! use romsync::remote::RommClient;
//! use romsync::server::{AppState, Server};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let catalog = Arc::new(RommClient::new(&config.romm)?);
//! let state = AppState::new(config, catalog, LocalInventory::in_memory());
//! Server::new(state, "127.0.0.1", 5000).start().await?;
//! # Ok(())
//! # }
//! ```

mod handlers;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
    GovernorLayer,
};
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::download::DownloadManager;
use crate::inventory::LocalInventory;
use crate::remote::CatalogSource;
use crate::scan::ScanOrchestrator;
use crate::scanner::RomScanner;

/// Maximum request body size (1 MiB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Upper bound for a single request, batch enqueues included.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Server state shared across handlers.
pub struct AppState {
    /// Loaded configuration (read-only at runtime).
    pub config: Config,
    /// Remote catalog.
    pub catalog: Arc<dyn CatalogSource>,
    pub inventory: LocalInventory,
    pub scanner: RomScanner,
    pub downloads: DownloadManager,
    pub scans: ScanOrchestrator,
}

impl AppState {
    /// Wire up the queue manager and scan orchestrator around `catalog` and
    /// `inventory`. Must be called from within a tokio runtime.
    pub fn new(config: Config, catalog: Arc<dyn CatalogSource>, inventory: LocalInventory) -> Self {
        let scanner = RomScanner::new(config.roms_root());
        let downloads = DownloadManager::new(
            catalog.clone(),
            inventory.clone(),
            scanner.clone(),
            config.downloads.queue_settings(),
        );
        let scans = ScanOrchestrator::new(inventory.clone(), scanner.clone(), config.scan.stale_after());
        Self {
            config,
            catalog,
            inventory,
            scanner,
            downloads,
            scans,
        }
    }
}

/// API server.
pub struct Server {
    state: Arc<AppState>,
    /// Address to bind to (defaults to 127.0.0.1 for security).
    bind_address: String,
    port: u16,
}

impl Server {
    pub fn new(state: AppState, bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            bind_address: bind_address.into(),
            port,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Result<Router> {
        // Configure rate limiting: 60 requests per minute per IP
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(1)
                .burst_size(60)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .context("Failed to build rate limiter config")?,
        );

        Ok(Router::new()
            .route("/health", get(handlers::health))
            .route("/api/config", get(handlers::get_config))
            .route("/api/platforms", get(handlers::list_platforms))
            .route("/api/platforms/:id/roms", get(handlers::platform_roms))
            .route("/api/roms/:id", get(handlers::rom_details))
            .route("/api/scan", post(handlers::start_scan))
            .route("/api/scan/status", get(handlers::scan_status))
            .route("/api/scan/reset", post(handlers::reset_scan))
            .route("/api/download", post(handlers::download))
            .route("/api/download/batch", post(handlers::download_batch))
            .route("/api/queue", get(handlers::queue).delete(handlers::clear_queue))
            .route("/api/queue/:id", delete(handlers::dismiss))
            .route("/api/stats", get(handlers::stats))
            .route("/api/mappings/suggest", get(handlers::suggest_mappings))
            .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(self.state.clone()))
    }

    /// Bind and serve until SIGINT/SIGTERM.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        tracing::info!("Starting server on {}", addr);

        if self.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. \
                    Another romsync server may be running; stop it or set app.port in the config.",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router()?;
        // The rate limiter keys on the peer address.
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                    }
                }
            }
            _ => {
                tracing::error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }

    tracing::info!("Shutting down server");
}
