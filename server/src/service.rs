//! Service lifecycle: owns the engine and its background tasks.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use ratekeeper_common::DurationExt;
use ratekeeper_fx::{FxError, HttpRateSource, RateEngine, RateSource, RefreshScheduler};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::config::ServerConfig;
use crate::state::ServiceState;

/// Errors raised while managing the service lifecycle.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid service transition from {from} to {to}")]
    InvalidState { from: ServiceState, to: ServiceState },

    #[error("Failed to build source client: {0}")]
    Source(#[from] FxError),
}

/// The running service.
pub struct Service {
    config: ServerConfig,
    engine: Arc<RateEngine>,
    state: RwLock<ServiceState>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Service {
    /// Create a service reading from `source`.
    pub fn new(config: ServerConfig, source: Arc<dyn RateSource>) -> Self {
        let engine = Arc::new(RateEngine::new(source, config.engine_config()));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            engine,
            state: RwLock::new(ServiceState::Starting),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Create a service backed by the configured HTTP source.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServiceError> {
        let source = HttpRateSource::new(&config.source_config())?;
        Ok(Self::new(config, Arc::new(source)))
    }

    /// Start the cache sweeper and the refresh scheduler.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.ensure_can_transition(ServiceState::Running)?;
        info!(source = %self.config.scraper.base_url, "Starting service");

        let sweeper = self.engine.spawn_cache_sweeper(
            self.config.cache.cleanup_period.as_std(),
            self.shutdown_tx.subscribe(),
        );
        let scheduler = RefreshScheduler::spawn(
            self.engine.clone(),
            self.config.scraper.refresh_interval.as_std(),
            self.shutdown_tx.subscribe(),
        );
        self.tasks.lock().extend([sweeper, scheduler]);

        self.transition(ServiceState::Running)?;
        info!("Service running");
        Ok(())
    }

    /// Signal shutdown and wait for background tasks to finish.
    ///
    /// Calling it again after the service stopped is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), ServiceError> {
        if matches!(
            self.state(),
            ServiceState::ShuttingDown | ServiceState::Stopped
        ) {
            return Ok(());
        }

        self.transition(ServiceState::ShuttingDown)?;
        info!("Stopping service");

        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task ended abnormally");
            }
        }

        self.transition(ServiceState::Stopped)?;
        info!("Service stopped");
        Ok(())
    }

    /// Receiver that flips to true once shutdown starts.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Get the current state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Get the engine.
    pub fn engine(&self) -> Arc<RateEngine> {
        self.engine.clone()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn ensure_can_transition(&self, next: ServiceState) -> Result<(), ServiceError> {
        let current = self.state();
        if current.can_transition_to(next) {
            Ok(())
        } else {
            Err(ServiceError::InvalidState {
                from: current,
                to: next,
            })
        }
    }

    fn transition(&self, next: ServiceState) -> Result<(), ServiceError> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(ServiceError::InvalidState {
                from: *state,
                to: next,
            });
        }
        *state = next;
        Ok(())
    }
}
