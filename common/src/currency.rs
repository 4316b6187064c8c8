//! Currency snapshot published by the reference source.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CurrencyError;

/// Immutable snapshot of a reference rate.
///
/// A snapshot is never updated in place: `with_value` builds a new one with a
/// fresh timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    /// Short unique code (e.g. `EUR`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Reference rate, strictly positive for a valid snapshot.
    pub value: f64,
    /// When this snapshot was produced.
    pub updated_at: DateTime<Utc>,
    /// Provenance tag (the source address).
    pub source: String,
}

impl Currency {
    /// Create a new snapshot stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value,
            updated_at: Utc::now(),
            source: source.into(),
        }
    }

    /// Produce a new snapshot carrying `value` and a fresh timestamp.
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Check the validity invariant, reporting the first violation.
    pub fn validate(&self) -> Result<(), CurrencyError> {
        if self.id.trim().is_empty() {
            return Err(CurrencyError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(CurrencyError::EmptyName(self.id.clone()));
        }
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(CurrencyError::NonPositiveValue {
                id: self.id.clone(),
                value: self.value,
            });
        }
        Ok(())
    }

    /// Check if the snapshot can be persisted.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Age of the snapshot relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
    }

    /// Check whether the snapshot is older than `max_age`.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(max_age, Utc::now())
    }

    /// Staleness check against an explicit instant.
    pub fn is_stale_at(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age_at(now) > max_age
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.value)
    }
}
