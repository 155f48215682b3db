//! Typed configuration struct and its validation.

use crate::error::ConfigError;
use secrecy::Secret;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server bind settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Persistent and fast-store connection strings.
    pub store: StoreConfig,

    /// Global-default rate limits, used when no token or dept override applies.
    #[serde(default)]
    pub rate_limit_defaults: RateLimitDefaults,

    /// Upstream request deadline.
    #[serde(default = "default_request_deadline", with = "humantime_serde")]
    pub request_deadline: Duration,

    /// Circuit-breaker tuning.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Opaque list of principal identifiers elevated to super-admin on the dashboard
    /// plane. The core never inspects this beyond passing it through.
    #[serde(default)]
    pub developers: Vec<String>,
}

fn default_request_deadline() -> Duration {
    Duration::from_secs(120)
}

impl GatewayConfig {
    /// Validate non-empty connection strings and positive limits.
    ///
    /// # Errors
    /// Returns a [`ConfigError::Validation`] describing the first failing rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        use secrecy::ExposeSecret;

        if self.store.persistent_store_url.expose_secret().trim().is_empty() {
            return Err(ConfigError::validation(
                "store.persistent_store_url must not be empty",
            ));
        }
        if self.store.fast_store_url.expose_secret().trim().is_empty() {
            return Err(ConfigError::validation(
                "store.fast_store_url must not be empty",
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::validation("server.port must be non-zero"));
        }
        if self.request_deadline.is_zero() {
            return Err(ConfigError::validation(
                "request_deadline must be greater than zero",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::validation(
                "breaker.failure_threshold must be greater than zero",
            ));
        }
        if self.breaker.open_duration.is_zero() {
            return Err(ConfigError::validation(
                "breaker.open_duration must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (`PROXY_PORT`, default 3000).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Connection strings for the persistent store and the fast counter store.
///
/// Both are wrapped in `Secret` since they typically embed credentials; they are never
/// logged, and `Debug`/`Display` on the outer struct must not expose them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQL connection string for the persistent store (Postgres or SQLite).
    pub persistent_store_url: Secret<String>,
    /// Connection string for the fast counter store (Redis or compatible).
    pub fast_store_url: Secret<String>,
}

/// Global-default rate limits (`DEFAULT_RPM|TPM|TPH|TPD`).
///
/// A value of `0` means unlimited, matching the three-valued semantics used for every
/// other limit override in the system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitDefaults {
    /// Requests per minute.
    pub rpm: u64,
    /// Output tokens per minute.
    pub tpm: u64,
    /// Output tokens per hour.
    pub tph: u64,
    /// Output tokens per day.
    pub tpd: u64,
}

impl Default for RateLimitDefaults {
    fn default() -> Self {
        Self {
            rpm: 60,
            tpm: 100_000,
            tph: 1_000_000,
            tpd: 10_000_000,
        }
    }
}

/// Circuit-breaker tuning, configurable per the open question in the design notes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before the next probe is allowed.
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> GatewayConfig {
        GatewayConfig {
            server: ServerConfig::default(),
            store: StoreConfig {
                persistent_store_url: Secret::new("postgres://localhost/gateway".to_string()),
                fast_store_url: Secret::new("redis://localhost".to_string()),
            },
            rate_limit_defaults: RateLimitDefaults::default(),
            request_deadline: default_request_deadline(),
            breaker: BreakerConfig::default(),
            developers: vec![],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_persistent_store_url_rejected() {
        let mut config = valid_config();
        config.store.persistent_store_url = Secret::new(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_breaker_threshold_rejected() {
        let mut config = valid_config();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let defaults = RateLimitDefaults::default();
        assert_eq!(defaults.rpm, 60);
        let breaker = BreakerConfig::default();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.open_duration, Duration::from_secs(30));
    }
}
