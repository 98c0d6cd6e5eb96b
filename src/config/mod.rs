//! Configuration management for trendcast
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::error::{ErrorCategory, TrendcastErrorTrait};
use crate::realtime::HubConfig;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to render config as TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl TrendcastErrorTrait for ConfigError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Config
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Response cache configuration
    pub cache: CacheSettings,

    /// Realtime hub configuration
    pub realtime: RealtimeConfig,

    /// Aggregation store configuration
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allow cross-origin requests
    pub enable_cors: bool,
    /// Log every request through the tracing layer
    pub enable_request_tracing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 3004,
            enable_cors: true,
            enable_request_tracing: true,
        }
    }
}

/// Cache sizing and per-resource TTLs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub default_ttl_secs: u64,
    pub max_entries: usize,
    pub profile_ttl_secs: u64,
    pub aggregate_ttl_secs: u64,
    pub trends_ttl_secs: u64,
    pub grouped_ttl_secs: u64,
    /// Maximum entries returned by grouped metrics
    pub grouped_results_limit: usize,
    /// Maximum profiles answered by one batch stats request
    pub batch_profile_limit: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 30,
            max_entries: 512,
            profile_ttl_secs: 60,
            aggregate_ttl_secs: 120,
            trends_ttl_secs: 300,
            grouped_ttl_secs: 120,
            grouped_results_limit: 25,
            batch_profile_limit: 25,
        }
    }
}

impl CacheSettings {
    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn aggregate_ttl(&self) -> Duration {
        Duration::from_secs(self.aggregate_ttl_secs)
    }

    pub fn trends_ttl(&self) -> Duration {
        Duration::from_secs(self.trends_ttl_secs)
    }

    pub fn grouped_ttl(&self) -> Duration {
        Duration::from_secs(self.grouped_ttl_secs)
    }
}

/// Realtime hub timing and capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub update_interval_secs: u64,
    pub heartbeat_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_clients: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 15,
            heartbeat_secs: 10,
            idle_timeout_secs: 60,
            max_clients: 100,
        }
    }
}

/// Aggregation store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON fixture backing the store; an empty store is used when unset
    pub fixture_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Environment helpers
// ============================================================================

/// Parse an env var, falling back to `default` when unset or unparseable
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Seconds-valued env var floored at one second
fn env_secs(key: &str, default: u64) -> u64 {
    env_or(key, default).max(1)
}

/// Count-valued env var floored at one
fn env_count(key: &str, default: usize) -> usize {
    env_or(key, default).max(1)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            server: ServerConfig {
                host: std::env::var("ANALYTICS_HOST").unwrap_or(defaults.server.host),
                port: env_or("ANALYTICS_PORT", defaults.server.port),
                enable_cors: env_or("ANALYTICS_ENABLE_CORS", defaults.server.enable_cors),
                enable_request_tracing: defaults.server.enable_request_tracing,
            },
            cache: CacheSettings {
                default_ttl_secs: env_secs("ANALYTICS_CACHE_DEFAULT_TTL_SECONDS", defaults.cache.default_ttl_secs),
                max_entries: env_count("ANALYTICS_CACHE_MAX_ENTRIES", defaults.cache.max_entries),
                profile_ttl_secs: env_secs("ANALYTICS_CACHE_PROFILE_TTL_SECONDS", defaults.cache.profile_ttl_secs),
                aggregate_ttl_secs: env_secs(
                    "ANALYTICS_CACHE_AGGREGATE_TTL_SECONDS",
                    defaults.cache.aggregate_ttl_secs,
                ),
                trends_ttl_secs: env_secs("ANALYTICS_CACHE_TRENDS_TTL_SECONDS", defaults.cache.trends_ttl_secs),
                grouped_ttl_secs: env_secs("ANALYTICS_CACHE_GROUPED_TTL_SECONDS", defaults.cache.grouped_ttl_secs),
                grouped_results_limit: env_count(
                    "ANALYTICS_GROUPED_RESULTS_LIMIT",
                    defaults.cache.grouped_results_limit,
                ),
                batch_profile_limit: env_count(
                    "ANALYTICS_BATCH_PROFILE_LIMIT",
                    defaults.cache.batch_profile_limit,
                ),
            },
            realtime: RealtimeConfig {
                update_interval_secs: env_secs(
                    "ANALYTICS_REALTIME_UPDATE_INTERVAL_SECONDS",
                    defaults.realtime.update_interval_secs,
                ),
                heartbeat_secs: env_secs("ANALYTICS_REALTIME_HEARTBEAT_SECONDS", defaults.realtime.heartbeat_secs),
                idle_timeout_secs: env_secs(
                    "ANALYTICS_REALTIME_IDLE_TIMEOUT_SECONDS",
                    defaults.realtime.idle_timeout_secs,
                ),
                max_clients: env_count("ANALYTICS_REALTIME_MAX_CLIENTS", defaults.realtime.max_clients),
            },
            store: StoreConfig {
                fixture_path: std::env::var("ANALYTICS_FIXTURE_PATH")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from),
            },
            logging: LoggingConfig {
                level: std::env::var("LOG_LEVEL").unwrap_or(defaults.logging.level),
                format: std::env::var("LOG_FORMAT").unwrap_or(defaults.logging.format),
            },
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` when given, otherwise from the environment, then validate
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be greater than 0");
        }
        if self.cache.grouped_results_limit == 0 {
            return invalid("cache.grouped_results_limit must be greater than 0");
        }
        if self.cache.batch_profile_limit == 0 {
            return invalid("cache.batch_profile_limit must be greater than 0");
        }
        if [
            self.cache.default_ttl_secs,
            self.cache.profile_ttl_secs,
            self.cache.aggregate_ttl_secs,
            self.cache.trends_ttl_secs,
            self.cache.grouped_ttl_secs,
        ]
        .contains(&0)
        {
            return invalid("cache TTLs must be at least 1 second");
        }
        if [
            self.realtime.update_interval_secs,
            self.realtime.heartbeat_secs,
            self.realtime.idle_timeout_secs,
        ]
        .contains(&0)
        {
            return invalid("realtime intervals must be at least 1 second");
        }
        if self.realtime.max_clients == 0 {
            return invalid("realtime.max_clients must be greater than 0");
        }
        if !["text", "json"].contains(&self.logging.format.as_str()) {
            return invalid("logging.format must be 'text' or 'json'");
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid("logging.level must be one of trace, debug, info, warn, error");
        }

        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Socket address string the server binds to
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Settings for the shared response cache
    #[must_use]
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            namespace: String::from("analytics"),
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            max_entries: self.cache.max_entries,
        }
    }

    /// Settings for the realtime hub
    #[must_use]
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            update_interval: Duration::from_secs(self.realtime.update_interval_secs),
            idle_timeout: Duration::from_secs(self.realtime.idle_timeout_secs),
            heartbeat: Duration::from_secs(self.realtime.heartbeat_secs),
            max_subscribers: self.realtime.max_clients,
            ..HubConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_entries() {
        let mut config = Config::default();
        config.cache.max_entries = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = String::from("xml");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hub_config_conversion() {
        let config = Config::default();
        let hub = config.to_hub_config();
        assert_eq!(hub.update_interval, Duration::from_secs(15));
        assert_eq!(hub.heartbeat, Duration::from_secs(10));
        assert_eq!(hub.idle_timeout, Duration::from_secs(60));
        assert_eq!(hub.max_subscribers, 100);
    }

    #[test]
    fn test_cache_config_conversion() {
        let config = Config::default();
        let cache = config.to_cache_config();
        assert_eq!(cache.default_ttl, Duration::from_secs(30));
        assert_eq!(cache.max_entries, 512);
        assert_eq!(config.cache.trends_ttl(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[server]\nport = 8080\n").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.realtime.max_clients, 100);
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_bind_addr() {
        assert_eq!(Config::default().bind_addr(), "0.0.0.0:3004");
    }
}
