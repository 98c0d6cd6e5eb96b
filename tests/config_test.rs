//! Tests for config loading from the environment and TOML files

use std::io::Write;
use std::time::Duration;

use serial_test::serial;
use tempfile::NamedTempFile;
use trendcast::config::{Config, ConfigError};

const ANALYTICS_VARS: &[&str] = &[
    "ANALYTICS_HOST",
    "ANALYTICS_PORT",
    "ANALYTICS_ENABLE_CORS",
    "ANALYTICS_CACHE_DEFAULT_TTL_SECONDS",
    "ANALYTICS_CACHE_MAX_ENTRIES",
    "ANALYTICS_CACHE_PROFILE_TTL_SECONDS",
    "ANALYTICS_CACHE_AGGREGATE_TTL_SECONDS",
    "ANALYTICS_CACHE_TRENDS_TTL_SECONDS",
    "ANALYTICS_CACHE_GROUPED_TTL_SECONDS",
    "ANALYTICS_GROUPED_RESULTS_LIMIT",
    "ANALYTICS_BATCH_PROFILE_LIMIT",
    "ANALYTICS_REALTIME_UPDATE_INTERVAL_SECONDS",
    "ANALYTICS_REALTIME_HEARTBEAT_SECONDS",
    "ANALYTICS_REALTIME_IDLE_TIMEOUT_SECONDS",
    "ANALYTICS_REALTIME_MAX_CLIENTS",
    "ANALYTICS_FIXTURE_PATH",
    "LOG_LEVEL",
    "LOG_FORMAT",
];

fn clear_env() {
    for var in ANALYTICS_VARS {
        std::env::remove_var(var);
    }
}

fn toml_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

// ============================================================================
// Environment
// ============================================================================

#[test]
#[serial]
fn test_from_env_defaults() {
    clear_env();
    let config = Config::from_env();
    assert_eq!(config, Config::default());
    assert_eq!(config.realtime.update_interval_secs, 15);
    assert_eq!(config.realtime.max_clients, 100);
    assert!(config.store.fixture_path.is_none());
}

#[test]
#[serial]
fn test_from_env_overrides() {
    clear_env();
    std::env::set_var("ANALYTICS_PORT", "8080");
    std::env::set_var("ANALYTICS_REALTIME_MAX_CLIENTS", "5");
    std::env::set_var("ANALYTICS_CACHE_TRENDS_TTL_SECONDS", " 42 ");
    std::env::set_var("ANALYTICS_FIXTURE_PATH", "/data/analytics.json");
    std::env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env();
    clear_env();

    assert_eq!(config.server.port, 8080);
    assert_eq!(config.realtime.max_clients, 5);
    assert_eq!(config.cache.trends_ttl(), Duration::from_secs(42));
    assert_eq!(
        config.store.fixture_path.as_deref(),
        Some(std::path::Path::new("/data/analytics.json"))
    );
    assert_eq!(config.logging.format, "json");
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_from_env_floors_zero_values() {
    clear_env();
    std::env::set_var("ANALYTICS_REALTIME_UPDATE_INTERVAL_SECONDS", "0");
    std::env::set_var("ANALYTICS_REALTIME_MAX_CLIENTS", "0");
    std::env::set_var("ANALYTICS_CACHE_MAX_ENTRIES", "0");
    std::env::set_var("ANALYTICS_BATCH_PROFILE_LIMIT", "0");

    let config = Config::from_env();
    clear_env();

    assert_eq!(config.realtime.update_interval_secs, 1);
    assert_eq!(config.realtime.max_clients, 1);
    assert_eq!(config.cache.max_entries, 1);
    assert_eq!(config.cache.batch_profile_limit, 1);
}

#[test]
#[serial]
fn test_from_env_ignores_unparseable_values() {
    clear_env();
    std::env::set_var("ANALYTICS_PORT", "not-a-port");
    std::env::set_var("ANALYTICS_REALTIME_HEARTBEAT_SECONDS", "-3");
    std::env::set_var("ANALYTICS_FIXTURE_PATH", "   ");

    let config = Config::from_env();
    clear_env();

    assert_eq!(config.server.port, 3004);
    assert_eq!(config.realtime.heartbeat_secs, 10);
    assert!(config.store.fixture_path.is_none());
}

#[test]
#[serial]
fn test_load_without_path_uses_env() {
    clear_env();
    std::env::set_var("ANALYTICS_HOST", "127.0.0.1");

    let config = Config::load(None);
    clear_env();

    assert_eq!(config.unwrap().bind_addr(), "127.0.0.1:3004");
}

// ============================================================================
// TOML files
// ============================================================================

#[test]
fn test_from_file_partial_sections() {
    let file = toml_file(
        r#"
[server]
port = 9000

[realtime]
max_clients = 3
update_interval_secs = 30

[store]
fixture_path = "fixtures/analytics.json"
"#,
    );

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.realtime.max_clients, 3);

    let hub = config.to_hub_config();
    assert_eq!(hub.update_interval, Duration::from_secs(30));
    assert_eq!(hub.max_subscribers, 3);
    assert_eq!(config.cache.grouped_results_limit, 25);
    assert_eq!(config.cache.batch_profile_limit, 25);
}

#[test]
fn test_rendered_config_loads_back() {
    let mut config = Config::default();
    config.cache.max_entries = 64;
    config.logging.level = "debug".to_string();

    let file = toml_file(&config.to_toml().unwrap());
    assert_eq!(Config::load(Some(file.path())).unwrap(), config);
}

#[test]
fn test_load_rejects_invalid_values() {
    let file = toml_file("[cache]\nmax_entries = 0\n");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let file = toml_file("[logging]\nformat = \"xml\"\n");
    assert!(matches!(
        Config::load(Some(file.path())).unwrap_err(),
        ConfigError::Invalid(_)
    ));
}

#[test]
fn test_load_reports_parse_and_read_errors() {
    let file = toml_file("[server\nport = ");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("Failed to parse TOML"));

    let err = Config::from_file(std::path::Path::new("/nonexistent/trendcast.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
