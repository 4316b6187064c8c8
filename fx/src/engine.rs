//! Rate engine: the inbound API used by the HTTP adapter and the scheduler.

use std::sync::Arc;
use std::time::Duration;

use ratekeeper_common::{constants, DurationExt, RefreshState};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::query::{CurrencyListResult, CurrencyResult, QueryConfig, QueryFacade, RatePayload};
use crate::refresh::{RefreshConfig, RefreshOrchestrator, RefreshResult};
use crate::source::RateSource;
use crate::store::CurrencyStore;

/// Configuration for the rate engine.
#[derive(Debug, Clone)]
pub struct RateEngineConfig {
    /// Read path configuration.
    pub query: QueryConfig,
    /// Refresh configuration.
    pub refresh: RefreshConfig,
    /// Deadline applied to refreshes that do not carry their own.
    pub refresh_deadline: Duration,
}

impl Default for RateEngineConfig {
    fn default() -> Self {
        Self {
            query: QueryConfig::default(),
            refresh: RefreshConfig::default(),
            refresh_deadline: constants::refresh_deadline().as_std(),
        }
    }
}

/// Outcome of a source liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub url: String,
    pub live: bool,
    pub error: Option<String>,
}

/// The rate engine.
///
/// Owns the cache, the authoritative store and the components that
/// coordinate them. Shared behind an `Arc` by the adapter and the scheduler.
pub struct RateEngine {
    source: Arc<dyn RateSource>,
    store: Arc<CurrencyStore>,
    cache: TtlCache<RatePayload>,
    orchestrator: RefreshOrchestrator,
    query: QueryFacade,
    config: RateEngineConfig,
}

impl RateEngine {
    /// Create a new engine reading from `source`.
    pub fn new(source: Arc<dyn RateSource>, config: RateEngineConfig) -> Self {
        let store = Arc::new(CurrencyStore::new());
        let cache = TtlCache::new();
        let orchestrator = RefreshOrchestrator::new(
            source.clone(),
            store.clone(),
            cache.clone(),
            config.refresh.clone(),
        );
        let query = QueryFacade::new(store.clone(), cache.clone(), config.query.clone());

        Self {
            source,
            store,
            cache,
            orchestrator,
            query,
            config,
        }
    }

    /// Refresh from the source, bounded by `deadline`.
    pub async fn refresh(&self, force: bool, deadline: Duration) -> RefreshResult {
        self.orchestrator.refresh(force, deadline).await
    }

    /// Refresh with the configured default deadline.
    pub async fn refresh_default(&self, force: bool) -> RefreshResult {
        self.refresh(force, self.config.refresh_deadline).await
    }

    /// Get one currency.
    pub fn get_currency(&self, id: &str, use_cache: bool) -> CurrencyResult {
        self.query.get_one(id, use_cache)
    }

    /// Get every currency.
    pub fn get_all_currencies(&self, use_cache: bool, include_stale: bool) -> CurrencyListResult {
        self.query.get_all(use_cache, include_stale)
    }

    /// Cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Probe the source without fetching.
    #[instrument(skip(self))]
    pub async fn source_health(&self, timeout: Duration) -> SourceHealth {
        let outcome = self.source.check_live(timeout).await;
        if let Err(e) = &outcome {
            warn!(error = %e, "Source health check failed");
        } else {
            debug!("Source is healthy");
        }

        SourceHealth {
            source: self.source.name().to_string(),
            url: self.source.base_url().to_string(),
            live: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Phase of the current or last refresh.
    pub fn refresh_state(&self) -> RefreshState {
        self.orchestrator.state()
    }

    /// Result of the last refresh run.
    pub fn last_refresh(&self) -> Option<RefreshResult> {
        self.orchestrator.last_result()
    }

    /// Number of currencies in the authoritative store.
    pub fn currency_count(&self) -> usize {
        self.store.count()
    }

    /// Start the periodic cache sweep.
    pub fn spawn_cache_sweeper(
        &self,
        period: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        self.cache.spawn_sweeper(period, shutdown)
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &RateEngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockRateSource;

    const DOCUMENT: &str = r#"<html><body>
        <div id="euro"><strong>144,37320000</strong></div>
        <div id="dolar"><strong>168,34059493</strong></div>
    </body></html>"#;

    fn engine() -> (RateEngine, Arc<MockRateSource>) {
        let source = Arc::new(MockRateSource::new(DOCUMENT));
        let engine = RateEngine::new(source.clone(), RateEngineConfig::default());
        (engine, source)
    }

    #[tokio::test]
    async fn test_refresh_then_read() {
        let (engine, _) = engine();

        let result = engine.refresh_default(true).await;
        assert!(result.success);
        assert_eq!(engine.currency_count(), 2);
        assert_eq!(engine.refresh_state(), RefreshState::Done);

        let first = engine.get_currency("EUR", true);
        assert!(!first.from_cache);
        assert_eq!(first.currency.as_ref().unwrap().value, 144.3732);

        let second = engine.get_currency("EUR", true);
        assert!(second.from_cache);
        assert_eq!(second.currency.unwrap().value, 144.3732);

        let stats = engine.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.key_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_invalidates_cached_reads() {
        let (engine, source) = engine();
        engine.refresh_default(true).await;

        let all = engine.get_all_currencies(true, false);
        assert_eq!(all.count, 2);
        assert!(engine.get_all_currencies(true, false).from_cache);

        source.set_document(Some(
            r#"<div id="euro"><strong>150,00</strong></div>"#.to_string(),
        ));
        let result = engine.refresh_default(true).await;
        assert_eq!(result.updated_identifiers, vec!["EUR"]);

        let all = engine.get_all_currencies(true, false);
        assert!(!all.from_cache);
        let eur = all.currencies.iter().find(|c| c.id == "EUR").unwrap();
        assert_eq!(eur.value, 150.0);
    }

    #[tokio::test]
    async fn test_source_health() {
        let (engine, source) = engine();

        let health = engine.source_health(Duration::from_secs(1)).await;
        assert!(health.live);
        assert!(health.error.is_none());

        source.set_live(false);
        let health = engine.source_health(Duration::from_secs(1)).await;
        assert!(!health.live);
        assert!(health.error.is_some());
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let (engine, _) = engine();

        let result = engine.get_currency("GBP", true);
        assert!(!result.success);
        assert!(result.currency.is_none());
    }
}
