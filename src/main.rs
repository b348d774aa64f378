//! Sessia - sharded session store
//!
//! This service:
//! - Watches Consul for the Redis shards tagged for sessions
//! - Assigns each shard a persistent identity
//! - Serves /save and /query, routing records by shard identity
//! - Exposes health/ready endpoints and Prometheus metrics

use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use sessia::api::{self, AppState};
use sessia::config::SessiaConfig;
use sessia::directory::ConsulDirectory;
use sessia::metrics::SessiaMetrics;
use sessia::session::{strategy_for, SessionRouter};
use sessia::shard::{DirectoryWatcher, Registry, RespConnector, ShardClient, WatcherSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = SessiaConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("sessia={}", config.log_level).parse()?)
                .add_directive("reqwest=warn".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        consul = %config.consul_addr,
        service = %config.shard_service,
        tag = %config.shard_tag,
        ttl_secs = config.session_ttl.as_secs(),
        balancing = ?config.balancing,
        "Starting Sessia"
    );

    let metrics = Arc::new(SessiaMetrics::install()?);
    info!("Prometheus metrics initialized");

    let registry = Registry::new();
    let directory = ConsulDirectory::new(&config.consul_addr, config.shard_port, config.shard_timeout)?;
    let connector = RespConnector::new(config.shard_timeout);

    let watcher = DirectoryWatcher::new(
        Arc::new(directory),
        Arc::new(connector),
        registry.clone(),
        WatcherSettings {
            service: config.shard_service.clone(),
            tag: config.shard_tag.clone(),
            interval: config.refresh_interval,
        },
        Arc::clone(&metrics),
    );
    let watcher = watcher.spawn();

    let router = SessionRouter::new(
        registry.clone(),
        strategy_for(config.balancing),
        config.session_ttl,
        Arc::clone(&metrics),
    );

    let app = api::router(AppState {
        router,
        metrics: Arc::clone(&metrics),
    });
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "HTTP server error");
    }

    // Graceful shutdown
    info!("Shutting down Sessia...");

    watcher.shutdown();
    watcher.join().await;

    for client in registry.publish(Vec::new(), HashMap::new()) {
        client.close().await;
    }

    info!("Sessia shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
