//! Service configuration.
//!
//! Configuration is read from a YAML file (path in `VMSYNC_CONFIG_FILE`,
//! default `vmsync.yaml`) with `VMSYNC__SECTION__KEY` environment overrides,
//! then validated eagerly. Any missing required key stops startup.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::db::DbConfig;

/// Environment variable naming the config file.
pub const CONFIG_FILE_ENV: &str = "VMSYNC_CONFIG_FILE";

const DEFAULT_CONFIG_FILE: &str = "vmsync.yaml";
const ENV_PREFIX: &str = "VMSYNC";
const DEFAULT_SCAN_COUNT: usize = 100;
const DEFAULT_KEY_PATTERN: &str = "*";
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 120;
const DEFAULT_HOST_TIMEOUT_SECS: u64 = 60;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("missing required configuration: {0}")]
    Missing(String),

    #[error("invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// A credential that must not show up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Validated service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    pub sync: SyncSettings,
    pub api_server: ApiServerConfig,
    pub database: DbConfig,
    pub redis: CacheConfig,
    pub endpoints: EndpointConfig,
    pub hypervisors: Vec<HypervisorConfig>,
}

/// Cycle timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Time between the end of one cycle and the start of the next.
    pub interval: Duration,

    /// Upper bound on a single cycle.
    pub timeout: Duration,

    /// Upper bound on one inventory request; never longer than `timeout`.
    pub host_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl ApiServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub url: String,

    /// COUNT hint for each SCAN page.
    pub scan_count: usize,

    /// MATCH pattern selecting session keys.
    pub key_pattern: String,
}

/// Downstream services notified on renames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub group_rename_url: String,
    pub identity_rename_url: String,

    /// Shared timeout for one batch of notifications.
    pub timeout: Duration,
}

/// One hypervisor host to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,

    /// Inventory gateway URL for this host.
    pub inventory_url: String,
}

// =============================================================================
// Raw (unvalidated) shape
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    log_level: Option<String>,
    sync: Option<RawSync>,
    api_server: Option<RawApiServer>,
    database: Option<RawDatabase>,
    redis: Option<RawRedis>,
    endpoints: Option<RawEndpoints>,
    hypervisors: Option<Vec<RawHypervisor>>,
}

#[derive(Debug, Deserialize)]
struct RawSync {
    interval: Option<u64>,
    timeout: Option<u64>,
    host_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawApiServer {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawRedis {
    url: Option<String>,
    scan_count: Option<usize>,
    key_pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEndpoints {
    group_rename_url: Option<String>,
    identity_rename_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawHypervisor {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    inventory_url: Option<String>,
}

fn required<T>(value: Option<T>, key: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn required_text(value: Option<String>, key: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

fn positive_secs(value: Option<u64>, key: &str) -> Result<Duration, ConfigError> {
    match required(value, key)? {
        0 => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        secs => Ok(Duration::from_secs(secs)),
    }
}

impl Config {
    /// Load configuration from the file named by `VMSYNC_CONFIG_FILE` plus
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let raw = config::Config::builder()
            .add_source(config::File::with_name(&path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<RawConfig>()?;

        Self::from_raw(raw)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize::<RawConfig>()?;

        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let sync = required(raw.sync, "sync")?;
        let timeout = positive_secs(sync.timeout, "sync.timeout")?;
        let host_timeout = positive_secs(
            Some(sync.host_timeout.unwrap_or(DEFAULT_HOST_TIMEOUT_SECS)),
            "sync.host_timeout",
        )?;
        let sync = SyncSettings {
            interval: positive_secs(sync.interval, "sync.interval")?,
            timeout,
            host_timeout: host_timeout.min(timeout),
        };

        let api = required(raw.api_server, "api_server")?;
        let api_server = ApiServerConfig {
            host: required_text(api.host, "api_server.host")?,
            port: required(api.port, "api_server.port")?,
        };

        let db = required(raw.database, "database")?;
        let defaults = DbConfig::default();
        let database = DbConfig {
            database_url: required_text(db.url, "database.url")?,
            max_connections: db.max_connections.unwrap_or(defaults.max_connections),
            ..defaults
        };

        let redis = required(raw.redis, "redis")?;
        let redis = CacheConfig {
            url: required_text(redis.url, "redis.url")?,
            scan_count: redis.scan_count.unwrap_or(DEFAULT_SCAN_COUNT).max(1),
            key_pattern: redis
                .key_pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_KEY_PATTERN.to_string()),
        };

        let endpoints = required(raw.endpoints, "endpoints")?;
        let endpoints = EndpointConfig {
            group_rename_url: required_text(
                endpoints.group_rename_url,
                "endpoints.group_rename_url",
            )?,
            identity_rename_url: required_text(
                endpoints.identity_rename_url,
                "endpoints.identity_rename_url",
            )?,
            timeout: Duration::from_secs(
                endpoints
                    .timeout_secs
                    .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS)
                    .max(1),
            ),
        };

        let raw_hosts = required(raw.hypervisors, "hypervisors")?;
        if raw_hosts.is_empty() {
            return Err(ConfigError::Missing("hypervisors[0]".to_string()));
        }

        let mut hypervisors = Vec::with_capacity(raw_hosts.len());
        for (i, h) in raw_hosts.into_iter().enumerate() {
            let key = |field: &str| format!("hypervisors[{i}].{field}");
            let host = required_text(h.host, &key("host"))?;
            let port = required(h.port, &key("port"))?;
            let inventory_url = h
                .inventory_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| format!("https://{host}:{port}/inventory"));

            hypervisors.push(HypervisorConfig {
                username: required_text(h.username, &key("username"))?,
                password: Secret::new(required_text(h.password, &key("password"))?),
                host,
                port,
                inventory_url,
            });
        }

        Ok(Self {
            log_level: raw
                .log_level
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            sync,
            api_server,
            database,
            redis,
            endpoints,
            hypervisors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
sync:
  interval: 300
  timeout: 600
api_server:
  host: 0.0.0.0
  port: 8000
database:
  url: postgres://vmsync@localhost/vmsync
redis:
  url: redis://localhost:6379
endpoints:
  group_rename_url: http://groups.internal/rename
  identity_rename_url: http://auth.internal/rename
hypervisors:
  - host: esxi-1.lan
    port: 443
    username: root
    password: hunter2
  - host: esxi-2.lan
    port: 443
    username: root
    password: hunter3
    inventory_url: http://gateway.lan/esxi-2
"#;

    #[test]
    fn test_full_config() {
        let config = Config::from_yaml_str(FULL).unwrap();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.sync.interval, Duration::from_secs(300));
        assert_eq!(config.sync.timeout, Duration::from_secs(600));
        assert_eq!(config.sync.host_timeout, Duration::from_secs(60));
        assert_eq!(config.api_server.listen_addr(), "0.0.0.0:8000");
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.redis.scan_count, 100);
        assert_eq!(config.redis.key_pattern, "*");
        assert_eq!(config.endpoints.timeout, Duration::from_secs(120));
        assert_eq!(config.hypervisors.len(), 2);
        assert_eq!(
            config.hypervisors[0].inventory_url,
            "https://esxi-1.lan:443/inventory"
        );
        assert_eq!(config.hypervisors[1].inventory_url, "http://gateway.lan/esxi-2");
        assert_eq!(config.hypervisors[1].password.expose(), "hunter3");
    }

    #[test]
    fn test_missing_password_is_fatal() {
        let yaml = FULL.replace("    password: hunter3\n", "");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(
            matches!(&err, ConfigError::Missing(key) if key == "hypervisors[1].password"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_empty_endpoint_is_missing() {
        let yaml = FULL.replace("http://auth.internal/rename", "\"\"");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(&err, ConfigError::Missing(key) if key == "endpoints.identity_rename_url"));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let yaml = FULL.replace("interval: 300", "interval: 0");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "sync.interval"));
    }

    #[test]
    fn test_host_timeout_bounded_by_cycle_timeout() {
        let yaml = FULL.replace("timeout: 600", "timeout: 30\n  host_timeout: 90");
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.sync.timeout, Duration::from_secs(30));
        assert_eq!(config.sync.host_timeout, Duration::from_secs(30));

        let yaml = FULL.replace("timeout: 600", "timeout: 600\n  host_timeout: 45");
        let config = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.sync.host_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_missing_section_is_fatal() {
        let yaml = FULL.replace("redis:\n  url: redis://localhost:6379\n", "");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(&err, ConfigError::Missing(key) if key == "redis"));
    }

    #[test]
    fn test_secret_is_redacted() {
        let config = Config::from_yaml_str(FULL).unwrap();
        let debug = format!("{:?}", config.hypervisors[0]);
        assert!(debug.contains("***"));
        assert!(!debug.contains("hunter2"));
    }
}
