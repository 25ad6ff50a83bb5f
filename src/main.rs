//! cache-hierarchy server.
//!
//! Builds the tier hierarchy from configuration, runs periodic maintenance
//! (expiry sweeps, distributed tier reconnects) and exposes the admin API.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use cache_hierarchy::cache::CacheCoordinator;
use cache_hierarchy::config::{Cli, Config};
use cache_hierarchy::server::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "cache_hierarchy=debug,tower_http=debug"
    } else {
        "cache_hierarchy=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("cache-hierarchy v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, then apply CLI overrides.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if cli.no_distributed {
        config.distributed.enabled = false;
    }

    info!(
        memory_entries = config.memory.max_entries,
        memory_bytes = config.memory.max_bytes,
        disk_enabled = config.disk.enabled,
        disk_dir = %config.disk.cache_dir.display(),
        disk_bytes = config.disk.max_bytes,
        distributed_enabled = config.distributed.enabled,
        "Configuration loaded"
    );

    // Build the hierarchy.
    let cache = CacheCoordinator::from_config(&config).await?;

    // Periodic maintenance.
    let maintenance = {
        let cache = cache.clone();
        let period = Duration::from_secs(config.server.maintenance_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.maintain().await;
            }
        })
    };

    // Build application state and router.
    let state = Arc::new(AppState::new(cache.clone())?);
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    maintenance.abort();
    cache.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
