//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (first of `hiscore.toml`,
//!   `/etc/hiscore/hiscore.toml`, `~/.config/hiscore/hiscore.toml`)
//! - Environment variables (`HISCORE__<SECTION>__<KEY>`, e.g.
//!   `HISCORE__LIMITS__MAX_CONNECTIONS=5000`)
//! - `HISCORE_HOST` / `HISCORE_PORT` for the listen address defaults

use anyhow::{bail, Context, Result};
use hiscore_core::{HubConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "hiscore.toml",
    "/etc/hiscore/hiscore.toml",
    "~/.config/hiscore/hiscore.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Games announced to clients in `CONNECTED` before any score arrives.
    #[serde(default)]
    pub games: Vec<String>,

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
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Origins allowed to open a WebSocket. Empty allows any origin.
    /// Requests without an `Origin` header are always allowed.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-client outbound queue capacity.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Hub command queue capacity.
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Maximum topics per client.
    #[serde(default = "default_max_topics")]
    pub max_topics_per_client: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keepalive probe interval in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// How long to wait for a probe acknowledgement, in milliseconds.
    #[serde(default = "default_pong_wait")]
    pub pong_wait_ms: u64,

    /// Deadline for a single write, in milliseconds.
    #[serde(default = "default_write_wait")]
    pub write_wait_ms: u64,
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

    /// How often hub gauges are refreshed, in milliseconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

// Default value functions
fn default_host() -> String {
    std::env::var("HISCORE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HISCORE_PORT")
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
    10_000
}

fn default_max_message_size() -> usize {
    512 * 1024 // 512 KB
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_command_queue_capacity() -> usize {
    1024
}

fn default_max_topics() -> usize {
    100
}

fn default_ping_interval() -> u64 {
    54_000 // 9/10 of the pong wait
}

fn default_pong_wait() -> u64 {
    60_000
}

fn default_write_wait() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_refresh_interval() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            games: Vec::new(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            command_queue_capacity: default_command_queue_capacity(),
            max_topics_per_client: default_max_topics(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_wait_ms: default_pong_wait(),
            write_wait_ms: default_write_wait(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config source cannot be parsed or the result
    /// is invalid.
    pub fn load() -> Result<Self> {
        let path = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        let mut builder = ::config::Config::builder();
        if let Some(path) = &path {
            tracing::info!("Loading config from {}", path.display());
            builder = builder.add_source(::config::File::from(path.as_path()));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("HISCORE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("games")
                    .with_list_parse_key("transport.allowed_origins")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
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

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat.ping_interval_ms >= self.heartbeat.pong_wait_ms {
            bail!(
                "heartbeat.ping_interval_ms ({}) must be less than heartbeat.pong_wait_ms ({})",
                self.heartbeat.ping_interval_ms,
                self.heartbeat.pong_wait_ms
            );
        }
        if self.limits.outbound_queue_capacity == 0 || self.limits.command_queue_capacity == 0 {
            bail!("queue capacities must be at least 1");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }

    /// Hub settings derived from the limits.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            command_capacity: self.limits.command_queue_capacity,
        }
    }

    /// Per-client session settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_capacity: self.limits.outbound_queue_capacity,
            ping_interval: Duration::from_millis(self.heartbeat.ping_interval_ms),
            pong_wait: Duration::from_millis(self.heartbeat.pong_wait_ms),
            write_wait: Duration::from_millis(self.heartbeat.write_wait_ms),
            max_topics: self.limits.max_topics_per_client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_message_size, 512 * 1024);
        assert_eq!(config.limits.outbound_queue_capacity, 256);
        assert!(config.games.is_empty());
        assert!(config.validate().is_ok());
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
            games = ["Tetris", "Snake"]

            [limits]
            max_connections = 50000

            [heartbeat]
            ping_interval_ms = 9000
            pong_wait_ms = 10000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.games, vec!["Tetris", "Snake"]);
        assert_eq!(config.limits.max_connections, 50000);
        assert_eq!(config.limits.max_topics_per_client, 100);
        assert_eq!(config.heartbeat.write_wait_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_mapping() {
        let config = Config::default();
        let session = config.session_config();
        assert_eq!(session.ping_interval, Duration::from_secs(54));
        assert_eq!(session.pong_wait, Duration::from_secs(60));
        assert_eq!(session.write_wait, Duration::from_secs(10));
        assert_eq!(session.outbound_capacity, 256);
        assert_eq!(config.hub_config().command_capacity, 1024);
    }

    #[test]
    fn test_ping_must_precede_deadline() {
        let mut config = Config::default();
        config.heartbeat.ping_interval_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_missing() {
        assert!(Config::from_file("/nonexistent/hiscore.toml").is_err());
    }
}
