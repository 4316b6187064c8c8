//! Authoritative in-memory store of current rates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ratekeeper_common::Currency;
use tracing::debug;

use crate::error::FxResult;

/// Source of truth between refreshes: one snapshot per currency id.
///
/// Callers only ever receive clones, so nothing outside the store can alter
/// stored snapshots. Whole-table reads happen under one shared lock and are a
/// consistent snapshot of the instant they run.
///
/// Every successful mutation bumps a revision counter under the write lock,
/// so a reader can tell whether the table changed since it looked.
#[derive(Default)]
pub struct CurrencyStore {
    currencies: RwLock<HashMap<String, Currency>>,
    revision: AtomicU64,
}

impl CurrencyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Save or replace the snapshot for `currency.id`.
    ///
    /// Invalid snapshots are rejected and leave any previous snapshot intact.
    pub fn save(&self, currency: Currency) -> FxResult<()> {
        currency.validate()?;

        debug!(currency = %currency.id, value = currency.value, "Saving currency");
        let mut currencies = self.currencies.write();
        currencies.insert(currency.id.clone(), currency);
        self.revision.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Current revision. Changes whenever a save or delete takes effect.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Look up a currency by id.
    pub fn find_by_id(&self, id: &str) -> Option<Currency> {
        self.currencies.read().get(id).cloned()
    }

    /// All stored currencies, ordered by id.
    pub fn find_all(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self.currencies.read().values().cloned().collect();
        currencies.sort_by(|a, b| a.id.cmp(&b.id));
        currencies
    }

    /// Remove a currency. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        let mut currencies = self.currencies.write();
        let removed = currencies.remove(id).is_some();
        if removed {
            self.revision.fetch_add(1, Ordering::AcqRel);
        }
        removed
    }

    /// Currencies whose snapshot is strictly newer than `since`, ordered by id.
    pub fn find_updated_since(&self, since: DateTime<Utc>) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = self
            .currencies
            .read()
            .values()
            .filter(|c| c.updated_at > since)
            .cloned()
            .collect();
        currencies.sort_by(|a, b| a.id.cmp(&b.id));
        currencies
    }

    /// Number of stored currencies.
    pub fn count(&self) -> usize {
        self.currencies.read().len()
    }
}
