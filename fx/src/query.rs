//! Read path: cache first, authoritative store on miss.

use std::sync::Arc;

use chrono::Duration;
use ratekeeper_common::{constants, Currency};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::cache::TtlCache;
use crate::store::CurrencyStore;

/// Aggregate key for the fresh-only collection view.
pub const ALL_CURRENCIES_KEY: &str = "currencies:all";

/// Aggregate key for the collection view that keeps stale entries.
pub const ALL_CURRENCIES_WITH_STALE_KEY: &str = "currencies:all:stale";

/// Every aggregate key; all of them go whenever any entity changes.
pub const AGGREGATE_KEYS: [&str; 2] = [ALL_CURRENCIES_KEY, ALL_CURRENCIES_WITH_STALE_KEY];

/// Cache key for a single currency.
pub fn currency_key(id: &str) -> String {
    format!("currency:{}", id)
}

/// Typed cache payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RatePayload {
    Single(Currency),
    Collection(Vec<Currency>),
}

/// TTLs and freshness window used by the read path.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// TTL for single-currency entries.
    pub currency_ttl: Duration,
    /// TTL for aggregate entries.
    pub collection_ttl: Duration,
    /// Entities older than this are filtered out of fresh-only results.
    pub staleness_threshold: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            currency_ttl: constants::currency_cache_ttl(),
            collection_ttl: constants::collection_cache_ttl(),
            staleness_threshold: constants::staleness_threshold(),
        }
    }
}

/// Result of a single-currency query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyResult {
    pub currency: Option<Currency>,
    pub from_cache: bool,
    pub success: bool,
    pub message: String,
}

/// Result of a collection query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyListResult {
    pub currencies: Vec<Currency>,
    pub count: usize,
    pub from_cache: bool,
    pub success: bool,
    pub message: String,
}

impl CurrencyListResult {
    fn new(currencies: Vec<Currency>, from_cache: bool, message: &str) -> Self {
        Self {
            count: currencies.len(),
            currencies,
            from_cache,
            success: true,
            message: message.to_string(),
        }
    }
}

/// Query façade over the cache and the authoritative store.
///
/// Owns neither: it only decides where a read is served from and when the
/// cache gets repopulated.
pub struct QueryFacade {
    store: Arc<CurrencyStore>,
    cache: TtlCache<RatePayload>,
    config: QueryConfig,
}

impl QueryFacade {
    /// Create a new façade.
    pub fn new(store: Arc<CurrencyStore>, cache: TtlCache<RatePayload>, config: QueryConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Fetch one currency by id.
    ///
    /// An unknown id is a normal outcome: `success` is false and nothing is
    /// cached.
    #[instrument(skip(self))]
    pub fn get_one(&self, id: &str, use_cache: bool) -> CurrencyResult {
        let key = currency_key(id);

        if use_cache {
            match self.cache.get(&key) {
                Some(RatePayload::Single(currency)) => {
                    return CurrencyResult {
                        currency: Some(currency),
                        from_cache: true,
                        success: true,
                        message: "Currency served from cache".to_string(),
                    };
                }
                Some(RatePayload::Collection(_)) => {
                    warn!(key = %key, "Unexpected payload under currency key");
                }
                None => {}
            }
        }

        let revision = self.store.revision();
        let Some(currency) = self.store.find_by_id(id) else {
            debug!(currency = %id, "Currency not found");
            return CurrencyResult {
                currency: None,
                from_cache: false,
                success: false,
                message: format!("Currency {} not found", id),
            };
        };

        if use_cache {
            self.populate(
                &key,
                RatePayload::Single(currency.clone()),
                self.config.currency_ttl,
                revision,
            );
        }

        CurrencyResult {
            currency: Some(currency),
            from_cache: false,
            success: true,
            message: "Currency served from store".to_string(),
        }
    }

    /// Fetch the whole collection.
    ///
    /// With `include_stale == false`, entities older than the staleness
    /// window are dropped before the result is returned or cached.
    #[instrument(skip(self))]
    pub fn get_all(&self, use_cache: bool, include_stale: bool) -> CurrencyListResult {
        let key = if include_stale {
            ALL_CURRENCIES_WITH_STALE_KEY
        } else {
            ALL_CURRENCIES_KEY
        };

        if use_cache {
            match self.cache.get(key) {
                Some(RatePayload::Collection(currencies)) => {
                    return CurrencyListResult::new(currencies, true, "Currencies served from cache");
                }
                Some(RatePayload::Single(_)) => {
                    warn!(key = %key, "Unexpected payload under aggregate key");
                }
                None => {}
            }
        }

        let revision = self.store.revision();
        let mut currencies = self.store.find_all();
        if !include_stale {
            let before = currencies.len();
            currencies.retain(|c| !c.is_stale(self.config.staleness_threshold));
            if currencies.len() < before {
                debug!(filtered = before - currencies.len(), "Filtered stale currencies");
            }
        }

        if use_cache {
            self.populate(
                key,
                RatePayload::Collection(currencies.clone()),
                self.config.collection_ttl,
                revision,
            );
        }

        CurrencyListResult::new(currencies, false, "Currencies served from store")
    }

    /// Cache a payload read from the store at `revision`.
    ///
    /// Skipped when the store moved on since the read. A mutation landing
    /// between the check and the write is caught by the second check, which
    /// drops the entry again; a refresh that invalidates afterwards removes it
    /// anyway.
    fn populate(&self, key: &str, payload: RatePayload, ttl: Duration, revision: u64) {
        if self.store.revision() != revision {
            debug!(key = %key, "Store changed during read, not caching");
            return;
        }

        if let Err(e) = self.cache.set(key, payload, ttl) {
            warn!(key = %key, error = %e, "Failed to populate cache");
            return;
        }

        if self.store.revision() != revision {
            debug!(key = %key, "Store changed while caching, dropping entry");
            self.cache.delete(key);
        }
    }
}
