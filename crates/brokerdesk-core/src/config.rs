//! Configuration resolution for brokerdesk.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/brokerdesk/settings.json) or an explicit file
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete brokerdesk configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

/// HTTP server and storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    /// Upper bound on rows returned by one history query.
    pub history_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database_path: None,
            history_limit: 100,
        }
    }
}

/// Live broker connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub keep_alive_secs: u64,
    pub ping_timeout_secs: u64,
    /// Bound on waiting for a SUBACK/UNSUBACK/PUBACK.
    pub operation_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Capacity of the client's outgoing request channel.
    pub request_capacity: usize,
    /// Capacity of the inbound ingestion queue.
    pub inbound_queue: usize,
    pub disconnect_grace_ms: u64,
    pub clean_session: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 2,
            ping_timeout_secs: 1,
            operation_timeout_secs: 5,
            connect_timeout_secs: 5,
            request_capacity: 64,
            inbound_queue: 1024,
            disconnect_grace_ms: 250,
            clean_session: false,
        }
    }
}

impl MqttConfig {
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// How long a keep-alive PINGREQ may go unanswered before the
    /// connection is treated as dead.
    pub const fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub const fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` replaces the global file when given; unlike the global file it
/// must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(path) if path.exists() => load_config_file(&path)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;

    Ok(config)
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("brokerdesk"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        dirs_fallback().map(|p| p.join("brokerdesk"))
    }
}

#[cfg(not(target_os = "linux"))]
fn dirs_fallback() -> Option<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|h| PathBuf::from(h).join(".brokerdesk"))
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.json"))
}

/// Get the default database path.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("brokerdesk.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}")))
}

fn apply_env_overrides(
    config: &mut Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(val) = lookup("BROKERDESK_LISTEN_ADDR") {
        config.server.listen_addr = parse_env("BROKERDESK_LISTEN_ADDR", &val)?;
    }
    if let Some(val) = lookup("BROKERDESK_DATABASE_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("BROKERDESK_KEEP_ALIVE_SECS") {
        config.mqtt.keep_alive_secs = parse_env("BROKERDESK_KEEP_ALIVE_SECS", &val)?;
    }
    if let Some(val) = lookup("BROKERDESK_OPERATION_TIMEOUT_SECS") {
        config.mqtt.operation_timeout_secs =
            parse_env("BROKERDESK_OPERATION_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("BROKERDESK_INBOUND_QUEUE") {
        config.mqtt.inbound_queue = parse_env("BROKERDESK_INBOUND_QUEUE", &val)?;
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    // rumqttc refuses sub-second keep alives; zero disables pings entirely.
    if config.mqtt.keep_alive_secs == 0 {
        return Err(Error::Config("mqtt.keep_alive_secs must be at least 1".into()));
    }
    if config.mqtt.ping_timeout_secs == 0 || config.mqtt.connect_timeout_secs == 0 {
        return Err(Error::Config(
            "mqtt.ping_timeout_secs and mqtt.connect_timeout_secs must be at least 1".into(),
        ));
    }
    if config.mqtt.inbound_queue == 0 || config.mqtt.request_capacity == 0 {
        return Err(Error::Config("mqtt queue capacities must be non-zero".into()));
    }
    if config.server.history_limit == 0 {
        return Err(Error::Config("server.history_limit must be non-zero".into()));
    }
    Ok(())
}
