//! RateKeeper FX Engine
//!
//! Keeps the latest reference rates published by a single external source
//! available to many concurrent readers while only occasionally going back
//! to the slow, unreliable source.
//!
//! # Components
//!
//! - [`extractor`]: pulls anchored values out of the source document
//! - [`source`]: HTTP client with liveness probe and bounded fetches
//! - [`cache`]: generic TTL cache with lazy and periodic eviction
//! - [`store`]: authoritative in-memory store of current rates
//! - [`refresh`]: single-flight refresh orchestration
//! - [`query`]: cache-first read path
//! - [`scheduler`]: periodic background refresh
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratekeeper_fx::{HttpRateSource, HttpSourceConfig, RateEngine, RateEngineConfig};
//!
//! let source = Arc::new(HttpRateSource::new(&HttpSourceConfig::default())?);
//! let engine = RateEngine::new(source, RateEngineConfig::default());
//!
//! let result = engine.refresh_default(true).await;
//! let eur = engine.get_currency("EUR", true);
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod query;
pub mod refresh;
pub mod scheduler;
pub mod source;
pub mod store;

pub use cache::{CacheStats, TtlCache};
pub use engine::{RateEngine, RateEngineConfig, SourceHealth};
pub use error::{ExtractionFailure, FxError, FxResult};
pub use extractor::Anchor;
pub use query::{CurrencyListResult, CurrencyResult, QueryConfig, QueryFacade, RatePayload};
pub use refresh::{RefreshConfig, RefreshOrchestrator, RefreshResult};
pub use scheduler::RefreshScheduler;
pub use source::{HttpRateSource, HttpSourceConfig, RateSource};
pub use store::CurrencyStore;

#[cfg(any(test, feature = "test-utils"))]
pub use source::MockRateSource;
