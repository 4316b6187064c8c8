//! Time utilities and constants for RateKeeper.

use chrono::{DateTime, Duration, Utc};

/// Default timing values.
pub mod constants {
    use super::Duration;

    /// Interval between scheduled refreshes (15 minutes).
    pub fn refresh_interval() -> Duration {
        Duration::minutes(15)
    }

    /// Age after which a snapshot is excluded from fresh results (30 minutes).
    pub fn staleness_threshold() -> Duration {
        Duration::minutes(30)
    }

    /// Cache lifetime of a single currency (5 minutes).
    pub fn currency_cache_ttl() -> Duration {
        Duration::minutes(5)
    }

    /// Cache lifetime of the collection view (2 minutes).
    pub fn collection_cache_ttl() -> Duration {
        Duration::minutes(2)
    }

    /// Period of the cache sweeper (5 minutes).
    pub fn cache_cleanup_period() -> Duration {
        Duration::minutes(5)
    }

    /// Timeout for a full document fetch (30 seconds).
    pub fn fetch_timeout() -> Duration {
        Duration::seconds(30)
    }

    /// Timeout for the liveness probe (10 seconds).
    pub fn liveness_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// Deadline for an on-demand refresh (60 seconds).
    pub fn refresh_deadline() -> Duration {
        Duration::seconds(60)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Check if an absolute expiry instant has been reached.
///
/// Reaching the instant exactly counts as expired.
pub fn is_expired_at(expiry: Timestamp, at: Timestamp) -> bool {
    at >= expiry
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Parse a duration such as `500ms`, `30s`, `15m` or `1h`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    let amount: i64 = digits.parse().ok()?;

    let scale: i64 = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return None,
    };
    Duration::try_milliseconds(amount.checked_mul(scale)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_expired_at_boundary() {
        let expiry = Utc::now();
        assert!(is_expired_at(expiry, expiry));
        assert!(is_expired_at(expiry, expiry + Duration::milliseconds(1)));
        assert!(!is_expired_at(expiry, expiry - Duration::milliseconds(1)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::milliseconds(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::seconds(30)));
        assert_eq!(parse_duration("15m"), Some(Duration::minutes(15)));
        assert_eq!(parse_duration("1h"), Some(Duration::hours(1)));
        assert_eq!(parse_duration("45"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("ten minutes"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_as_std_clamps_negative() {
        assert_eq!(Duration::seconds(-5).as_std(), std::time::Duration::ZERO);
        assert_eq!(
            Duration::seconds(5).as_std(),
            std::time::Duration::from_secs(5)
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_parse_duration_never_panics(input in "\\PC*") {
            let _ = parse_duration(&input);
        }

        #[test]
        fn prop_parse_duration_units(amount in 0u32..1_000_000) {
            let amount = i64::from(amount);
            proptest::prop_assert_eq!(
                parse_duration(&format!("{}m", amount)),
                Some(Duration::minutes(amount))
            );
            proptest::prop_assert_eq!(
                parse_duration(&format!("{}ms", amount)),
                Some(Duration::milliseconds(amount))
            );
        }
    }
}
