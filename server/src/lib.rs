//! RateKeeper Service
//!
//! Wires the rate engine to its background tasks and exposes it over HTTP.

pub mod config;
pub mod routes;
pub mod service;
pub mod state;

pub use config::ServerConfig;
pub use routes::router;
pub use service::{Service, ServiceError};
pub use state::ServiceState;
