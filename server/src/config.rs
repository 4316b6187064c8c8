//! Service configuration.

use chrono::Duration;
use ratekeeper_common::{constants, parse_duration, DurationExt};
use ratekeeper_fx::{
    Anchor, HttpSourceConfig, QueryConfig, RateEngineConfig, RefreshConfig,
};
use tracing::warn;

/// Source client configuration.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Address of the reference page.
    pub base_url: String,
    /// Timeout for a full document fetch.
    pub timeout: Duration,
    /// Timeout for the liveness probe.
    pub liveness_timeout: Duration,
    /// Interval between scheduled refreshes.
    pub refresh_interval: Duration,
    /// User agent sent to the source.
    pub user_agent: String,
    /// Accept certificates that fail validation.
    pub accept_invalid_certs: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        let source = HttpSourceConfig::default();
        Self {
            base_url: source.base_url,
            timeout: constants::fetch_timeout(),
            liveness_timeout: constants::liveness_timeout(),
            refresh_interval: constants::refresh_interval(),
            user_agent: source.user_agent,
            accept_invalid_certs: source.accept_invalid_certs,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Period of the background sweep.
    pub cleanup_period: Duration,
    /// TTL of single-currency entries.
    pub currency_ttl: Duration,
    /// TTL of collection entries.
    pub collection_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cleanup_period: constants::cache_cleanup_period(),
            currency_ttl: constants::currency_cache_ttl(),
            collection_ttl: constants::collection_cache_ttl(),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Source configuration.
    pub scraper: ScraperConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Age after which currencies drop out of fresh results.
    pub staleness_threshold: Duration,
    /// Deadline for a single refresh run.
    pub refresh_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            scraper: ScraperConfig::default(),
            cache: CacheConfig::default(),
            staleness_threshold: constants::staleness_threshold(),
            refresh_deadline: constants::refresh_deadline(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Unset or unparseable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("SERVER_HOST") {
            config.host = host;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid SERVER_PORT"),
            }
        }

        if let Some(url) = lookup("SCRAPER_BASE_URL") {
            config.scraper.base_url = url;
        }

        if let Some(agent) = lookup("SCRAPER_USER_AGENT") {
            config.scraper.user_agent = agent;
        }

        if let Some(flag) = lookup("SCRAPER_ACCEPT_INVALID_CERTS") {
            config.scraper.accept_invalid_certs = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        let durations: [(&str, &mut Duration); 8] = [
            ("SCRAPER_TIMEOUT", &mut config.scraper.timeout),
            ("SCRAPER_LIVENESS_TIMEOUT", &mut config.scraper.liveness_timeout),
            ("SCRAPER_REFRESH_INTERVAL", &mut config.scraper.refresh_interval),
            ("CACHE_CLEANUP_PERIOD", &mut config.cache.cleanup_period),
            ("CACHE_CURRENCY_TTL", &mut config.cache.currency_ttl),
            ("CACHE_COLLECTION_TTL", &mut config.cache.collection_ttl),
            ("STALENESS_THRESHOLD", &mut config.staleness_threshold),
            ("REFRESH_DEADLINE", &mut config.refresh_deadline),
        ];
        for (key, slot) in durations {
            if let Some(raw) = lookup(key) {
                match parse_duration(&raw) {
                    Some(duration) => *slot = duration,
                    None => warn!(key, value = %raw, "Ignoring invalid duration"),
                }
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if !self.scraper.base_url.starts_with("http://")
            && !self.scraper.base_url.starts_with("https://")
        {
            return Err(format!(
                "Scraper base URL must be http(s): {}",
                self.scraper.base_url
            ));
        }

        let positive = [
            ("Scraper timeout", self.scraper.timeout),
            ("Liveness timeout", self.scraper.liveness_timeout),
            ("Refresh interval", self.scraper.refresh_interval),
            ("Cache cleanup period", self.cache.cleanup_period),
            ("Currency cache TTL", self.cache.currency_ttl),
            ("Collection cache TTL", self.cache.collection_ttl),
            ("Staleness threshold", self.staleness_threshold),
            ("Refresh deadline", self.refresh_deadline),
        ];
        for (name, value) in positive {
            if value <= Duration::zero() {
                return Err(format!("{} must be positive", name));
            }
        }

        if self.cache.currency_ttl >= self.scraper.refresh_interval
            || self.cache.collection_ttl >= self.scraper.refresh_interval
        {
            return Err("Cache TTLs must be shorter than the refresh interval".to_string());
        }

        Ok(())
    }

    /// Source client settings.
    pub fn source_config(&self) -> HttpSourceConfig {
        HttpSourceConfig {
            base_url: self.scraper.base_url.clone(),
            user_agent: self.scraper.user_agent.clone(),
            accept_invalid_certs: self.scraper.accept_invalid_certs,
        }
    }

    /// Engine settings.
    pub fn engine_config(&self) -> RateEngineConfig {
        RateEngineConfig {
            query: QueryConfig {
                currency_ttl: self.cache.currency_ttl,
                collection_ttl: self.cache.collection_ttl,
                staleness_threshold: self.staleness_threshold,
            },
            refresh: RefreshConfig {
                liveness_timeout: self.scraper.liveness_timeout.as_std(),
                fetch_timeout: self.scraper.timeout.as_std(),
                anchors: Anchor::defaults(),
            },
            refresh_deadline: self.refresh_deadline.as_std(),
        }
    }

    /// Socket address to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");
        assert_eq!(config.scraper.base_url, "https://www.bcv.org.ve/");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "9000"),
            ("SCRAPER_REFRESH_INTERVAL", "1h"),
            ("CACHE_CURRENCY_TTL", "90s"),
            ("SCRAPER_TIMEOUT", "1500ms"),
            ("SCRAPER_ACCEPT_INVALID_CERTS", "true"),
        ]));

        assert_eq!(config.port, 9000);
        assert_eq!(config.scraper.refresh_interval, Duration::hours(1));
        assert_eq!(config.cache.currency_ttl, Duration::seconds(90));
        assert_eq!(config.scraper.timeout, Duration::milliseconds(1500));
        assert!(config.scraper.accept_invalid_certs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_PORT", "not-a-port"),
            ("CACHE_CURRENCY_TTL", "soon"),
        ]));

        assert_eq!(config.port, 8080);
        assert_eq!(config.cache.currency_ttl, constants::currency_cache_ttl());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.cache.collection_ttl = Duration::minutes(20);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.scraper.base_url = "ftp://example.org".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.refresh_deadline = Duration::zero();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_conversion() {
        let config = ServerConfig::default();
        let engine = config.engine_config();

        assert_eq!(engine.refresh.fetch_timeout, std::time::Duration::from_secs(30));
        assert_eq!(engine.refresh.liveness_timeout, std::time::Duration::from_secs(10));
        assert_eq!(engine.query.collection_ttl, Duration::minutes(2));
        assert_eq!(engine.refresh_deadline, std::time::Duration::from_secs(60));
    }

    proptest::proptest! {
        #[test]
        fn prop_any_nonzero_port_is_accepted(port in 1u16..=u16::MAX) {
            let port = port.to_string();
            let config = ServerConfig::from_lookup(lookup(&[("SERVER_PORT", port.as_str())]));
            proptest::prop_assert_eq!(config.port.to_string(), port);
            proptest::prop_assert!(config.validate().is_ok());
        }
    }
}
