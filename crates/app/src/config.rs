//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use messaging::DispatcherConfig;
use saga::{ActivityOptions, RetryPolicy, SagaOptions};
use thiserror::Error;

/// A configuration value that parses but cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for JSON logs, anything else for text
/// - `DATABASE_URL`: PostgreSQL connection string; the in-memory store is
///   used when unset
/// - `APP_ID`: identifies this instance in logs (default: `"orderservice"`)
/// - `OUTBOX_POLL_INTERVAL_MS`, `OUTBOX_BATCH_SIZE`
/// - `ACTIVITY_TIMEOUT_SECS`, `ACTIVITY_MAX_ATTEMPTS`, `SAGA_TIMEOUT_SECS`
/// - `LOCK_TIMEOUT_MS`, `MAX_REDELIVERIES`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub app_id: String,
    pub outbox_poll_interval: Duration,
    pub outbox_batch_size: usize,
    pub activity_timeout: Duration,
    pub activity_max_attempts: u32,
    pub saga_timeout: Duration,
    pub lock_timeout: Duration,
    pub max_redeliveries: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration from an arbitrary variable source.
    ///
    /// Unparsable values fall back to the default. A zero poll interval or
    /// batch size is rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let parsed = |name: &str| lookup(name).and_then(|v| v.parse::<u64>().ok());

        let config = Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            app_id: lookup("APP_ID").unwrap_or(defaults.app_id),
            outbox_poll_interval: parsed("OUTBOX_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.outbox_poll_interval),
            outbox_batch_size: parse_or(lookup("OUTBOX_BATCH_SIZE"), defaults.outbox_batch_size),
            activity_timeout: parsed("ACTIVITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.activity_timeout),
            activity_max_attempts: parse_or(
                lookup("ACTIVITY_MAX_ATTEMPTS"),
                defaults.activity_max_attempts,
            ),
            saga_timeout: parsed("SAGA_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.saga_timeout),
            lock_timeout: parsed("LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            max_redeliveries: parse_or(lookup("MAX_REDELIVERIES"), defaults.max_redeliveries),
        };

        if config.outbox_poll_interval.is_zero() {
            return Err(ConfigError::Zero("OUTBOX_POLL_INTERVAL_MS"));
        }
        if config.outbox_batch_size == 0 {
            return Err(ConfigError::Zero("OUTBOX_BATCH_SIZE"));
        }
        Ok(config)
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: self.outbox_poll_interval,
            batch_size: self.outbox_batch_size,
        }
    }

    pub fn saga_options(&self) -> SagaOptions {
        SagaOptions {
            activity: ActivityOptions {
                start_to_close_timeout: self.activity_timeout,
                retry_policy: RetryPolicy {
                    maximum_attempts: self.activity_max_attempts,
                    ..RetryPolicy::default()
                },
            },
            saga_timeout: self.saga_timeout,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            app_id: "orderservice".to_string(),
            outbox_poll_interval: Duration::from_millis(1000),
            outbox_batch_size: 100,
            activity_timeout: Duration::from_secs(60),
            activity_max_attempts: 3,
            saga_timeout: Duration::from_secs(600),
            lock_timeout: Duration::from_millis(5000),
            max_redeliveries: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_overrides_from_variables() {
        let config = from_map(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("OUTBOX_POLL_INTERVAL_MS", "250"),
            ("ACTIVITY_MAX_ATTEMPTS", "5"),
            ("SAGA_TIMEOUT_SECS", "30"),
        ]);

        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        assert_eq!(
            config.dispatcher_config().poll_interval,
            Duration::from_millis(250)
        );

        let options = config.saga_options();
        assert_eq!(options.activity.retry_policy.maximum_attempts, 5);
        assert_eq!(options.saga_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_map(&[("PORT", "not-a-port"), ("DATABASE_URL", "")]);
        assert_eq!(config.port, 3000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let err = Config::from_lookup(|name| {
            (name == "OUTBOX_POLL_INTERVAL_MS").then(|| "0".to_string())
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::Zero("OUTBOX_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let err =
            Config::from_lookup(|name| (name == "OUTBOX_BATCH_SIZE").then(|| "0".to_string()))
                .unwrap_err();
        assert_eq!(err, ConfigError::Zero("OUTBOX_BATCH_SIZE"));
    }
}
