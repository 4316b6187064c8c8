//! Error types for RateKeeper common types.

use thiserror::Error;

use crate::refresh::RefreshState;

/// Violation of the currency validity invariant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurrencyError {
    /// Identifier is empty.
    #[error("Currency identifier cannot be empty")]
    EmptyId,

    /// Display name is empty.
    #[error("Currency {0} has an empty name")]
    EmptyName(String),

    /// Rate is zero, negative or not finite.
    #[error("Currency {id} has non-positive value {value}")]
    NonPositiveValue { id: String, value: f64 },
}

impl CurrencyError {
    /// Get error code for boundary payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            CurrencyError::EmptyId => "EMPTY_ID",
            CurrencyError::EmptyName(_) => "EMPTY_NAME",
            CurrencyError::NonPositiveValue { .. } => "NON_POSITIVE_VALUE",
        }
    }
}

/// Error when attempting an invalid refresh state transition.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid refresh transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RefreshState,
    pub to: RefreshState,
}
