//! FX engine error types.

use ratekeeper_common::CurrencyError;
use thiserror::Error;

/// Why a single anchor could not be turned into a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    /// No element carries the anchor id.
    #[error("anchor not found in document")]
    AnchorNotFound,

    /// The anchor element has no numeric text node.
    #[error("no numeric text under anchor")]
    MissingNumericText,

    /// The text is not a finite, non-negative decimal.
    #[error("cannot parse {0:?} as a decimal")]
    InvalidNumber(String),

    /// The anchor id cannot be turned into a selector.
    #[error("invalid anchor selector: {0}")]
    InvalidAnchor(String),
}

/// Errors that can occur in the FX engine.
#[derive(Debug, Error)]
pub enum FxError {
    /// Liveness probe or fetch could not reach the source.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Source answered with a non-success status.
    #[error("Source returned status {status}")]
    SourceStatus { status: u16 },

    /// A network call or the whole refresh exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// One anchor failed; siblings are unaffected.
    #[error("Extraction failed for anchor {anchor}: {reason}")]
    Extraction {
        anchor: String,
        reason: ExtractionFailure,
    },

    /// Not a single anchor produced a value.
    #[error("No values could be extracted ({attempted} anchors attempted)")]
    TotalExtractionFailure { attempted: usize },

    /// Entity failed the validity invariant and was not stored.
    #[error("Invalid entity: {0}")]
    InvalidEntity(#[from] CurrencyError),

    /// Cache TTL must be strictly positive.
    #[error("Invalid TTL: {0}ms")]
    InvalidTtl(i64),

    /// Cache keys cannot be empty.
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),

    /// A refresh is already running and the caller did not force one.
    #[error("A refresh is already in progress")]
    RefreshInProgress,

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FxError {
    /// Get error code for boundary payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::SourceUnavailable(_) => "SOURCE_UNAVAILABLE",
            FxError::SourceStatus { .. } => "SOURCE_UNAVAILABLE",
            FxError::Timeout(_) => "TIMEOUT",
            FxError::Extraction { .. } => "EXTRACTION_ERROR",
            FxError::TotalExtractionFailure { .. } => "TOTAL_EXTRACTION_FAILURE",
            FxError::InvalidEntity(_) => "INVALID_ENTITY",
            FxError::InvalidTtl(_) => "INVALID_TTL",
            FxError::InvalidKey(_) => "INVALID_KEY",
            FxError::RefreshInProgress => "REFRESH_IN_PROGRESS",
            FxError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
