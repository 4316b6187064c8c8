//! RateKeeper Binary
//!
//! Serves the latest reference rates and keeps them refreshed in the background.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_server::{router, ServerConfig, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting RateKeeper");

    // Load configuration
    let config = ServerConfig::from_env();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let service = Arc::new(Service::from_config(config.clone())?);
    service.start().await?;

    // Set up graceful shutdown
    let service_clone = service.clone();
    let signal_task = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown signal received");
        if let Err(e) = service_clone.stop().await {
            error!(error = %e, "Error during shutdown");
        }
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr()).await?;
    info!(listen_addr = %config.listen_addr(), "RateKeeper running");

    let mut shutdown = service.shutdown_signal();
    axum::serve(listener, router(service.engine()))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    // The signal task owns the stop sequence once shutdown has begun
    signal_task.await?;
    info!(state = %service.state(), "RateKeeper shutdown complete");
    Ok(())
}
