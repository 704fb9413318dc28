// Broker settings shared by the gateway, workers and CLI

use std::time::Duration;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub redis_url: String,
    /// Bound on one submit round trip
    pub round_trip_timeout: Duration,
    /// How long a published result stays retrievable
    pub result_cache_ttl: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            round_trip_timeout: Duration::from_secs(300),
            result_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl BrokerConfig {
    /// Read `REDIS_URL`, `BROKER_TIMEOUT_SECS` and `RESULT_CACHE_TTL_SECS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            round_trip_timeout: secs("BROKER_TIMEOUT_SECS", defaults.round_trip_timeout),
            result_cache_ttl: secs("RESULT_CACHE_TTL_SECS", defaults.result_cache_ttl),
        }
    }
}
