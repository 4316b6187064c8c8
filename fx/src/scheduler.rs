//! Periodic background refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::engine::RateEngine;
use crate::refresh::RefreshResult;

/// Drives refreshes on a fixed interval until shutdown.
pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Spawn the scheduling loop.
    ///
    /// Performs one forced refresh right away, then a non-forced refresh
    /// every `interval`. Once `shutdown` flips to true (or its sender is
    /// dropped) the tick in flight completes and no new tick starts.
    pub fn spawn(
        engine: Arc<RateEngine>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            if *shutdown.borrow() {
                return;
            }

            info!(interval_secs = interval.as_secs(), "Refresh scheduler started");
            log_outcome("initial", &engine.refresh_default(true).await);

            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                if *shutdown.borrow() {
                    break;
                }

                tokio::select! {
                    biased;

                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        log_outcome("scheduled", &engine.refresh_default(false).await);
                    }
                }
            }

            info!("Refresh scheduler stopped");
        })
    }
}

fn log_outcome(trigger: &str, result: &RefreshResult) {
    if result.success {
        info!(
            trigger,
            run_id = %result.run_id,
            updated = result.updated_count,
            "Scheduled refresh finished"
        );
    } else if result.error_code.as_deref() == Some("REFRESH_IN_PROGRESS") {
        debug!(trigger, "Refresh skipped, another run is in flight");
    } else {
        error!(
            trigger,
            run_id = %result.run_id,
            error_code = ?result.error_code,
            message = %result.message,
            "Scheduled refresh failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RateEngineConfig;
    use crate::source::MockRateSource;

    const DOCUMENT: &str = r#"<div id="euro"><strong>144,37320000</strong></div>"#;
    const INTERVAL: Duration = Duration::from_secs(15 * 60);

    fn engine() -> (Arc<RateEngine>, Arc<MockRateSource>) {
        let source = Arc::new(MockRateSource::new(DOCUMENT));
        let engine = Arc::new(RateEngine::new(source.clone(), RateEngineConfig::default()));
        (engine, source)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_and_periodic_refresh() {
        let (engine, source) = engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = RefreshScheduler::spawn(engine.clone(), INTERVAL, shutdown_rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(engine.currency_count(), 1);

        tokio::time::sleep(INTERVAL).await;
        assert_eq!(source.fetch_count(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_start() {
        let (engine, source) = engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        RefreshScheduler::spawn(engine, INTERVAL, shutdown_rx)
            .await
            .unwrap();
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_tick_completes_on_shutdown() {
        let (engine, source) = engine();
        source.set_fetch_delay(Some(Duration::from_secs(5)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = RefreshScheduler::spawn(engine.clone(), INTERVAL, shutdown_rx);
        while !engine.refresh_state().is_in_progress() {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(source.fetch_count(), 1);
        assert!(engine.last_refresh().unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_stops_scheduler() {
        let (engine, _) = engine();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = RefreshScheduler::spawn(engine, INTERVAL, shutdown_rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(shutdown_tx);

        handle.await.unwrap();
    }
}
