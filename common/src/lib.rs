//! RateKeeper Common Types
//!
//! This crate contains the types shared across RateKeeper: the currency
//! snapshot and its validity rules, the refresh run state machine, and time
//! helpers used for staleness checks.

pub mod currency;
pub mod error;
pub mod refresh;
pub mod time;

pub use currency::*;
pub use error::*;
pub use refresh::*;
pub use time::*;
