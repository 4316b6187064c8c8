//! Refresh orchestration.
//!
//! A run walks `Idle -> CheckingLiveness -> Fetching -> Extracting ->
//! Persisting -> Done`, failing out of any of the three middle phases before
//! persistence begins. Failed runs never touch the store or the cache.
//!
//! Runs are single-flight: a forced refresh waits for the in-flight run, a
//! non-forced one is turned away with `REFRESH_IN_PROGRESS`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use ratekeeper_common::{constants, Currency, DurationExt, RefreshRun, RefreshState};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::TtlCache;
use crate::error::{FxError, FxResult};
use crate::extractor::{self, Anchor};
use crate::query::{currency_key, RatePayload, AGGREGATE_KEYS};
use crate::source::RateSource;
use crate::store::CurrencyStore;

/// Timeouts and anchors used by every run.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Timeout for the liveness probe.
    pub liveness_timeout: Duration,
    /// Timeout for the document fetch.
    pub fetch_timeout: Duration,
    /// Anchors to extract, in persistence order.
    pub anchors: Vec<Anchor>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: constants::liveness_timeout().as_std(),
            fetch_timeout: constants::fetch_timeout().as_std(),
            anchors: Anchor::defaults(),
        }
    }
}

/// Summary of one refresh attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub run_id: Uuid,
    pub updated_count: usize,
    pub updated_identifiers: Vec<String>,
    pub success: bool,
    pub message: String,
    pub final_state: RefreshState,
    /// Per-anchor and per-entity failures absorbed by the run.
    pub failures: Vec<String>,
    /// Cache keys deleted by the run, in order.
    pub invalidated_keys: Vec<String>,
    /// Set when the run failed as a whole.
    pub error_code: Option<String>,
    pub duration_ms: i64,
}

impl RefreshResult {
    fn failed(run: &RefreshRun, error: &FxError, failures: Vec<String>) -> Self {
        Self {
            run_id: run.id,
            updated_count: 0,
            updated_identifiers: Vec::new(),
            success: false,
            message: error.to_string(),
            final_state: RefreshState::Failed,
            failures,
            invalidated_keys: Vec::new(),
            error_code: Some(error.error_code().to_string()),
            duration_ms: run.timing.total_duration_ms().unwrap_or(0),
        }
    }

    fn in_progress() -> Self {
        let error = FxError::RefreshInProgress;
        Self {
            run_id: Uuid::now_v7(),
            updated_count: 0,
            updated_identifiers: Vec::new(),
            success: false,
            message: error.to_string(),
            final_state: RefreshState::Failed,
            failures: Vec::new(),
            invalidated_keys: Vec::new(),
            error_code: Some(error.error_code().to_string()),
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Persisted {
    updated: Vec<String>,
    invalidated: Vec<String>,
    failures: Vec<String>,
}

/// Reconciles source output into the store and invalidates the cache.
pub struct RefreshOrchestrator {
    source: Arc<dyn RateSource>,
    store: Arc<CurrencyStore>,
    cache: TtlCache<RatePayload>,
    config: RefreshConfig,
    gate: Mutex<()>,
    state: RwLock<RefreshState>,
    last_result: RwLock<Option<RefreshResult>>,
}

impl RefreshOrchestrator {
    /// Create a new orchestrator.
    pub fn new(
        source: Arc<dyn RateSource>,
        store: Arc<CurrencyStore>,
        cache: TtlCache<RatePayload>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            source,
            store,
            cache,
            config,
            gate: Mutex::new(()),
            state: RwLock::new(RefreshState::Idle),
            last_result: RwLock::new(None),
        }
    }

    /// Phase of the current or most recent run.
    pub fn state(&self) -> RefreshState {
        *self.state.read()
    }

    /// Result of the most recent run that was allowed to start.
    pub fn last_result(&self) -> Option<RefreshResult> {
        self.last_result.read().clone()
    }

    /// Run one refresh bounded by `deadline`.
    ///
    /// The deadline covers waiting for an in-flight run as well as the run
    /// itself. Never returns an error: failures are reported in the result.
    #[instrument(skip(self), fields(source = %self.source.name()))]
    pub async fn refresh(&self, force: bool, deadline: Duration) -> RefreshResult {
        let deadline_at = Instant::now() + deadline;

        let _guard = if force {
            match tokio::time::timeout_at(deadline_at, self.gate.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Timed out waiting for in-flight refresh");
                    // The in-flight run still owns the published state
                    let mut run = RefreshRun::new(force);
                    fail_run(&mut run);
                    let error = FxError::Timeout("waiting for in-flight refresh".to_string());
                    return RefreshResult::failed(&run, &error, Vec::new());
                }
            }
        } else {
            match self.gate.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    info!("Refresh already in progress, skipping");
                    return RefreshResult::in_progress();
                }
            }
        };

        let mut run = RefreshRun::new(force);
        info!(run_id = %run.id, forced = run.forced, "Starting refresh");

        let outcome = tokio::time::timeout_at(deadline_at, self.execute(&mut run)).await;
        let result = match outcome {
            Ok(Ok(persisted)) => {
                let count = persisted.updated.len();
                info!(
                    run_id = %run.id,
                    updated = count,
                    failures = persisted.failures.len(),
                    fetch_ms = run.timing.fetch_duration_ms().unwrap_or(0),
                    total_ms = run.timing.total_duration_ms().unwrap_or(0),
                    "Refresh completed"
                );
                RefreshResult {
                    run_id: run.id,
                    updated_count: count,
                    updated_identifiers: persisted.updated,
                    success: true,
                    message: format!("Updated {} currencies", count),
                    final_state: run.state,
                    failures: persisted.failures,
                    invalidated_keys: persisted.invalidated,
                    error_code: None,
                    duration_ms: run.timing.total_duration_ms().unwrap_or(0),
                }
            }
            Ok(Err((error, failures))) => {
                self.abort(&mut run);
                warn!(
                    run_id = %run.id,
                    failed_in = ?run.failed_in,
                    error = %error,
                    "Refresh failed"
                );
                RefreshResult::failed(&run, &error, failures)
            }
            Err(_) => {
                self.abort(&mut run);
                let error = FxError::Timeout(format!("refresh exceeded {:?}", deadline));
                warn!(run_id = %run.id, failed_in = ?run.failed_in, "Refresh timed out");
                RefreshResult::failed(&run, &error, Vec::new())
            }
        };

        *self.last_result.write() = Some(result.clone());
        result
    }

    async fn execute(
        &self,
        run: &mut RefreshRun,
    ) -> Result<Persisted, (FxError, Vec<String>)> {
        let no_failures = |e: FxError| (e, Vec::new());

        self.advance(run, RefreshState::CheckingLiveness)
            .map_err(no_failures)?;
        self.source
            .check_live(self.config.liveness_timeout)
            .await
            .map_err(no_failures)?;

        self.advance(run, RefreshState::Fetching).map_err(no_failures)?;
        let document = self
            .source
            .fetch_document(self.config.fetch_timeout)
            .await
            .map_err(no_failures)?;

        self.advance(run, RefreshState::Extracting)
            .map_err(no_failures)?;
        let (currencies, failures) = self.extract(&document);
        if currencies.is_empty() {
            let error = FxError::TotalExtractionFailure {
                attempted: self.config.anchors.len(),
            };
            return Err((error, failures));
        }

        self.advance(run, RefreshState::Persisting)
            .map_err(|e| (e, failures.clone()))?;
        let mut persisted = self.persist(currencies);
        let mut all_failures = failures;
        all_failures.append(&mut persisted.failures);
        persisted.failures = all_failures;

        self.advance(run, RefreshState::Done)
            .map_err(|e| (e, persisted.failures.clone()))?;
        Ok(persisted)
    }

    fn extract(&self, document: &[u8]) -> (Vec<Currency>, Vec<String>) {
        let document = String::from_utf8_lossy(document);
        let extraction = extractor::extract(&document, &self.config.anchors);
        let failures = extraction.failures.iter().map(|e| e.to_string()).collect();

        debug!(
            extracted = extraction.values.len(),
            attempted = extraction.attempted(),
            "Extraction finished"
        );
        (extraction.to_currencies(self.source.base_url()), failures)
    }

    // No suspension points: a deadline can never split a batch.
    fn persist(&self, currencies: Vec<Currency>) -> Persisted {
        let mut persisted = Persisted::default();

        for currency in currencies {
            let id = currency.id.clone();
            if let Err(e) = self.store.save(currency) {
                warn!(currency = %id, error = %e, "Failed to save currency");
                persisted.failures.push(format!("{}: {}", id, e));
                continue;
            }

            let key = currency_key(&id);
            self.cache.delete(&key);
            persisted.invalidated.push(key);
            persisted.updated.push(id);
        }

        for key in AGGREGATE_KEYS {
            self.cache.delete(key);
            persisted.invalidated.push(key.to_string());
        }

        persisted
    }

    fn advance(&self, run: &mut RefreshRun, next: RefreshState) -> FxResult<()> {
        run.transition_to(next)
            .map_err(|e| FxError::Internal(e.to_string()))?;
        *self.state.write() = next;
        debug!(run_id = %run.id, state = %next, "Refresh phase");
        Ok(())
    }

    fn abort(&self, run: &mut RefreshRun) {
        fail_run(run);
        *self.state.write() = run.state;
    }
}

fn fail_run(run: &mut RefreshRun) {
    if run.state == RefreshState::Idle {
        // Never got to probe the source; record it as failing there.
        let _ = run.transition_to(RefreshState::CheckingLiveness);
    }
    if let Err(e) = run.fail() {
        warn!(run_id = %run.id, error = %e, "Unexpected refresh transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryConfig, QueryFacade, ALL_CURRENCIES_KEY, ALL_CURRENCIES_WITH_STALE_KEY};
    use crate::source::MockRateSource;
    use chrono::Duration as ChronoDuration;

    const DOCUMENT: &str = r#"<html><body>
        <div id="euro"><span>EUR</span><strong> 144,37320000 </strong></div>
        <div id="dolar"><span>USD</span><strong> 168,34059493 </strong></div>
    </body></html>"#;

    const DEADLINE: Duration = Duration::from_secs(60);

    struct Fixture {
        source: Arc<MockRateSource>,
        store: Arc<CurrencyStore>,
        cache: TtlCache<RatePayload>,
        orchestrator: Arc<RefreshOrchestrator>,
    }

    fn fixture(document: &str) -> Fixture {
        let source = Arc::new(MockRateSource::new(document));
        let store = Arc::new(CurrencyStore::new());
        let cache = TtlCache::new();
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            source.clone(),
            store.clone(),
            cache.clone(),
            RefreshConfig::default(),
        ));
        Fixture {
            source,
            store,
            cache,
            orchestrator,
        }
    }

    fn seed(fixture: &Fixture) {
        fixture
            .store
            .save(Currency::new("EUR", "Euro", 100.0, "seed"))
            .unwrap();
        fixture
            .cache
            .set(
                &currency_key("EUR"),
                RatePayload::Single(Currency::new("EUR", "Euro", 100.0, "seed")),
                ChronoDuration::minutes(5),
            )
            .unwrap();
        fixture
            .cache
            .set(ALL_CURRENCIES_KEY, RatePayload::Collection(vec![]), ChronoDuration::minutes(2))
            .unwrap();
    }

    #[tokio::test]
    async fn test_end_to_end_refresh_then_query() {
        let f = fixture(DOCUMENT);

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(result.success);
        assert_eq!(result.final_state, RefreshState::Done);
        assert_eq!(result.updated_identifiers, vec!["EUR", "USD"]);
        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 144.3732);
        assert_eq!(f.store.find_by_id("USD").unwrap().value, 168.34059493);
        assert_eq!(f.store.find_by_id("EUR").unwrap().source, "https://mock.source/");

        let query = QueryFacade::new(f.store.clone(), f.cache.clone(), QueryConfig::default());
        let first = query.get_one("EUR", true);
        assert!(!first.from_cache);
        assert_eq!(first.currency.as_ref().unwrap().value, 144.3732);

        let second = query.get_one("EUR", true);
        assert!(second.from_cache);
        assert_eq!(second.currency.unwrap().value, 144.3732);
    }

    #[tokio::test]
    async fn test_partial_extraction_is_success() {
        let f = fixture(
            r#"<div id="euro"><strong>144,37320000</strong></div>
               <div id="dolar"><strong>sin dato</strong></div>"#,
        );

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(result.success);
        assert_eq!(result.updated_count, 1);
        assert_eq!(result.updated_identifiers, vec!["EUR"]);
        assert_eq!(result.failures.len(), 1);
        assert!(f.store.find_by_id("USD").is_none());
    }

    #[tokio::test]
    async fn test_refresh_invalidates_entity_and_aggregate_keys_once() {
        let f = fixture(DOCUMENT);
        seed(&f);

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(result.success);

        let count = |key: &str| result.invalidated_keys.iter().filter(|k| *k == key).count();
        assert_eq!(count(&currency_key("EUR")), 1);
        assert_eq!(count(ALL_CURRENCIES_KEY), 1);
        assert_eq!(count(ALL_CURRENCIES_WITH_STALE_KEY), 1);
        assert!(!f.cache.exists(&currency_key("EUR")));
        assert!(!f.cache.exists(ALL_CURRENCIES_KEY));

        // Aggregate keys come after every entity key
        let aggregate_at = result
            .invalidated_keys
            .iter()
            .position(|k| k == ALL_CURRENCIES_KEY)
            .unwrap();
        assert_eq!(aggregate_at, 2);
    }

    #[tokio::test]
    async fn test_liveness_failure_leaves_state_untouched() {
        let f = fixture(DOCUMENT);
        seed(&f);
        f.source.set_live(false);

        let result = f.orchestrator.refresh(true, DEADLINE).await;
        assert!(!result.success);
        assert_eq!(result.final_state, RefreshState::Failed);
        assert_eq!(result.error_code.as_deref(), Some("SOURCE_UNAVAILABLE"));
        assert_eq!(f.source.fetch_count(), 0);

        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 100.0);
        assert_eq!(f.store.count(), 1);
        assert!(f.cache.exists(&currency_key("EUR")));
        assert!(f.cache.exists(ALL_CURRENCIES_KEY));
    }

    #[tokio::test]
    async fn test_fetch_status_failure() {
        let f = fixture(DOCUMENT);
        f.source.set_document(None);

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("SOURCE_UNAVAILABLE"));
        assert_eq!(f.store.count(), 0);
    }

    #[tokio::test]
    async fn test_total_extraction_failure() {
        let f = fixture("<html><body><p>maintenance</p></body></html>");
        seed(&f);

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("TOTAL_EXTRACTION_FAILURE"));
        assert_eq!(result.failures.len(), 2);
        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 100.0);
        assert!(f.cache.exists(ALL_CURRENCIES_KEY));
        assert_eq!(f.orchestrator.state(), RefreshState::Failed);
    }

    #[tokio::test]
    async fn test_invalid_entities_are_skipped() {
        let f = fixture(
            r#"<div id="euro"><strong>0,00</strong></div>
               <div id="dolar"><strong>168,34059493</strong></div>"#,
        );

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(result.success);
        assert_eq!(result.updated_identifiers, vec!["USD"]);
        assert!(result.failures.iter().any(|m| m.starts_with("EUR")));
        assert!(f.store.find_by_id("EUR").is_none());
    }

    #[tokio::test]
    async fn test_zero_updates_still_reaches_done() {
        let f = fixture(
            r#"<div id="euro"><strong>0,00</strong></div>
               <div id="dolar"><strong>0,00</strong></div>"#,
        );

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(result.success);
        assert_eq!(result.updated_count, 0);
        assert_eq!(result.final_state, RefreshState::Done);
        assert!(result.error_code.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let f = fixture(DOCUMENT);
        seed(&f);
        f.source.set_fetch_delay(Some(Duration::from_secs(20)));

        let result = f.orchestrator.refresh(true, Duration::from_secs(5)).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("TIMEOUT"));
        assert_eq!(result.final_state, RefreshState::Failed);
        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 100.0);
        assert!(f.cache.exists(&currency_key("EUR")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let f = fixture(DOCUMENT);
        f.source.set_fetch_delay(Some(Duration::from_secs(10)));

        let orchestrator = f.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.refresh(true, DEADLINE).await });
        while !f.orchestrator.state().is_in_progress() {
            tokio::task::yield_now().await;
        }

        let skipped = f.orchestrator.refresh(false, DEADLINE).await;
        assert!(!skipped.success);
        assert_eq!(skipped.error_code.as_deref(), Some("REFRESH_IN_PROGRESS"));

        let forced = f.orchestrator.refresh(true, DEADLINE).await;
        assert!(forced.success);

        let first = first.await.unwrap();
        assert!(first.success);
        assert_eq!(f.source.fetch_count(), 2);
        assert_eq!(f.orchestrator.last_result().unwrap().run_id, forced.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_refresh_times_out_behind_in_flight_run() {
        let f = fixture(DOCUMENT);
        seed(&f);
        f.source.set_fetch_delay(Some(Duration::from_secs(30)));

        let orchestrator = f.orchestrator.clone();
        let first = tokio::spawn(async move { orchestrator.refresh(true, DEADLINE).await });
        while !f.orchestrator.state().is_in_progress() {
            tokio::task::yield_now().await;
        }

        let waited = f.orchestrator.refresh(true, Duration::from_secs(5)).await;
        assert!(!waited.success);
        assert_eq!(waited.error_code.as_deref(), Some("TIMEOUT"));
        assert_eq!(waited.final_state, RefreshState::Failed);
        assert_eq!(waited.updated_count, 0);
        assert!(waited.invalidated_keys.is_empty());

        // The in-flight run is unaffected
        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 100.0);
        assert!(f.cache.exists(&currency_key("EUR")));
        assert_eq!(f.orchestrator.state(), RefreshState::Fetching);
        assert!(f.orchestrator.last_result().is_none());
        assert_eq!(f.source.fetch_count(), 1);

        let first = first.await.unwrap();
        assert!(first.success);
        assert_eq!(f.store.find_by_id("EUR").unwrap().value, 144.3732);
        assert_eq!(f.orchestrator.last_result().unwrap().run_id, first.run_id);
    }

    #[tokio::test]
    async fn test_last_result_and_state() {
        let f = fixture(DOCUMENT);
        assert!(f.orchestrator.last_result().is_none());
        assert_eq!(f.orchestrator.state(), RefreshState::Idle);

        let result = f.orchestrator.refresh(false, DEADLINE).await;
        assert_eq!(f.orchestrator.state(), RefreshState::Done);
        assert_eq!(f.orchestrator.last_result().unwrap().run_id, result.run_id);
    }
}
