//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults (`TABLEAU_HOST` / `TABLEAU_PORT` seed host and port)
//! - TOML configuration file, first found of [`CONFIG_PATHS`]
//! - Environment overrides (`TABLEAU__LIMITS__MAX_TABLES=500`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tableau_core::AppConfig;

/// Config file locations, in search order.
pub const CONFIG_PATHS: [&str; 3] = [
    "tableau.toml",
    "/etc/tableau/tableau.toml",
    "~/.config/tableau/tableau.toml",
];

/// Prefix of environment overrides; nested keys are separated by `__`.
const ENV_PREFIX: &str = "TABLEAU";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Account rules.
    #[serde(default)]
    pub accounts: AccountsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of open tables.
    #[serde(default = "default_max_tables")]
    pub max_tables: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Capacity of the dispatcher's inbound queue.
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Account rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Shortest nickname accepted at registration.
    #[serde(default = "default_min_nickname_length")]
    pub min_nickname_length: usize,

    /// Nicknames nobody may register.
    #[serde(default = "default_reserved_nicknames")]
    pub reserved_nicknames: Vec<String>,
}

// Default value functions
fn default_host() -> String {
    std::env::var("TABLEAU_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("TABLEAU_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_tables() -> usize {
    tableau_core::table::DEFAULT_MAX_TABLES
}

fn default_max_message_size() -> usize {
    1024 * 1024 // 1 MB, whole documents travel in one frame
}

fn default_dispatch_queue() -> usize {
    4096
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_min_nickname_length() -> usize {
    tableau_core::accounts::DEFAULT_MIN_NICKNAME_LENGTH
}

fn default_reserved_nicknames() -> Vec<String> {
    vec![tableau_core::accounts::GUEST_PREFIX.to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            accounts: AccountsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_tables: default_max_tables(),
            max_message_size: default_max_message_size(),
            dispatch_queue: default_dispatch_queue(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            min_nickname_length: default_min_nickname_length(),
            reserved_nicknames: default_reserved_nicknames(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, or defaults,
    /// then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let base = match Self::find_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        base.with_env_overrides(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn find_file() -> Option<String> {
        CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Layer `env` over this configuration.
    fn with_env_overrides(self, env: config::Environment) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(
                config::Config::try_from(&self).context("Failed to stage configuration")?,
            )
            .add_source(env.separator("__").try_parsing(true))
            .build()
            .context("Failed to read environment overrides")?;
        layered
            .try_deserialize()
            .context("Invalid environment override")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Settings for the application context.
    #[must_use]
    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            max_tables: self.limits.max_tables,
            min_nickname_length: self.accounts.min_nickname_length,
            reserved_nicknames: self.accounts.reserved_nicknames.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_tables, 10_000);
        assert_eq!(config.accounts.reserved_nicknames, vec!["guest"]);
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".into();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_tables = 12

            [accounts]
            min_nickname_length = 4
            reserved_nicknames = ["guest", "admin"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_tables, 12);
        assert_eq!(config.limits.max_connections, 100_000);

        let app = config.app_config();
        assert_eq!(app.max_tables, 12);
        assert_eq!(app.min_nickname_length, 4);
        assert_eq!(app.reserved_nicknames, vec!["guest", "admin"]);
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        let vars: HashMap<String, String> = [
            ("TABLEAU__LIMITS__MAX_TABLES", "3"),
            ("TABLEAU__HEARTBEAT__INTERVAL_MS", "500"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = Config::default()
            .with_env_overrides(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
            .unwrap();
        assert_eq!(config.limits.max_tables, 3);
        assert_eq!(config.heartbeat.interval_ms, 500);
        assert_eq!(config.transport.websocket_path, "/ws");
    }
}
