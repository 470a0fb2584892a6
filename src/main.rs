//! Service registry (v1)
//!
//! Tracks running instances of named services, probes their health
//! endpoints, raises tiered load alerts and answers discovery queries.
//!
//! # Architecture Overview
//!
//! ```text
//!     register / heartbeat / unregister          discovery queries
//!     ─────────────────────┐                ┌───────────────────
//!                          ▼                ▼
//!                     ┌──────────────────────────┐
//!                     │   http (axum router)     │
//!                     └────────────┬─────────────┘
//!                                  ▼
//!                     ┌──────────────────────────┐
//!                     │  registry::InstanceStore │◀──── TTL sweep
//!                     └────────────┬─────────────┘         │
//!                         snapshot │   ▲ status + load     │
//!                                  ▼   │                   │
//!                     ┌──────────────────────────┐         │
//!                     │  health::HealthMonitor   │─────────┘
//!                     │  probes · alerts · stats │──── GET {health_endpoint}
//!                     └──────────────────────────┘       on every instance
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use service_registry::config::load_config;
use service_registry::health::HealthMonitor;
use service_registry::http::HttpServer;
use service_registry::lifecycle::{wait_for_signal, Shutdown};
use service_registry::observability::{logging, metrics};
use service_registry::registry::InstanceStore;

#[derive(Parser)]
#[command(name = "service-registry")]
#[command(about = "Service registry with active health monitoring", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; environment variables override it
    #[arg(short, long, env = "SERVICE_REGISTRY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    logging::init_logging(&config.observability)?;
    tracing::info!("service-registry v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.server.bind_address,
        monitoring_enabled = config.monitoring.enabled,
        interval_secs = config.monitoring.interval_secs,
        ttl_secs = config.registry.ttl_secs,
        "Configuration loaded"
    );

    let metrics_handle = if config.observability.metrics_enabled {
        metrics::init_metrics()
    } else {
        None
    };

    let store = Arc::new(InstanceStore::new());
    let monitor = Arc::new(HealthMonitor::new(Arc::clone(&store), &config));
    monitor.start();

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, store, Arc::clone(&monitor), metrics_handle);
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let result = tokio::select! {
        _ = wait_for_signal() => {
            shutdown.trigger();
            (&mut server_task).await
        }
        result = &mut server_task => result,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }
    monitor.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
