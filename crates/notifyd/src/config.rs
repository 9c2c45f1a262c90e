//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. The binary applies CLI flags last.
//!
//! ```toml
//! bind_address = "0.0.0.0"
//! port = 4000
//! backend = "redis"
//!
//! [keepalive]
//! pong_wait_ms = 60000
//!
//! [limits]
//! outbound_buffer = 64
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use notify_core::TenantId;
use notify_protocol::NOTIFICATION_CHANNEL;

use crate::room::ClusterConfig;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 4000;

/// Default Redis URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

// ============================================================================
// Errors
// ============================================================================

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Backend
// ============================================================================

/// Which key store and pub/sub implementation to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Redis for both key store and pub/sub
    #[default]
    Redis,

    /// In-process maps; nothing survives a restart
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Redis => write!(f, "redis"),
            Backend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            _ => Err(ConfigError::Invalid(format!(
                "unknown backend {s:?} (expected \"redis\" or \"memory\")"
            ))),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Connection liveness timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    /// Read deadline; renewed by every inbound frame
    pub pong_wait_ms: u64,

    /// Probe period; defaults to 9/10 of the read deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_period_ms: Option<u64>,

    /// Deadline for writing one outbound frame
    pub write_wait_ms: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            pong_wait_ms: 60_000,
            ping_period_ms: None,
            write_wait_ms: 10_000,
        }
    }
}

impl KeepaliveConfig {
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms.unwrap_or(self.pong_wait_ms.saturating_mul(9) / 10))
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }
}

/// Queue capacities and frame size limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted inbound frame, in bytes
    pub max_message_size: usize,

    /// Frames queued per client before new ones are dropped
    pub outbound_buffer: usize,

    /// Inbound frames queued per client
    pub inbound_buffer: usize,

    pub hub_command_buffer: usize,

    pub cluster_command_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 4096,
            outbound_buffer: 64,
            inbound_buffer: 16,
            hub_command_buffer: 64,
            cluster_command_buffer: 256,
        }
    }
}

/// A connection key preloaded into the in-memory key store.
///
/// Like every connection key it admits one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedKey {
    pub key: String,
    pub store_id: TenantId,
    #[serde(default)]
    pub user_id: String,
}

// ============================================================================
// Config
// ============================================================================

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,

    /// Route that accepts WebSocket upgrades
    pub ws_path: String,

    pub redis_url: String,

    /// Pub/sub channel the publisher bridge consumes
    pub notification_channel: String,

    pub backend: Backend,

    /// How long shutdown waits for connections to send their close frames
    pub shutdown_grace_ms: u64,

    pub keepalive: KeepaliveConfig,
    pub limits: LimitsConfig,

    /// Keys the `memory` backend starts with; it has no other way to get any
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub seed_keys: Vec<SeedKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            ws_path: "/ws".to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
            notification_channel: NOTIFICATION_CHANNEL.to_string(),
            backend: Backend::default(),
            shutdown_grace_ms: 2_000,
            keepalive: KeepaliveConfig::default(),
            limits: LimitsConfig::default(),
            seed_keys: Vec::new(),
        }
    }
}

impl Config {
    /// Default config file location (`$XDG_CONFIG_HOME/notifyd/notifyd.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notifyd").join("notifyd.toml"))
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(default) if default.is_file() => Self::load(&default),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`.
    ///
    /// `NOTIFYD_PORT` wins over the plain `PORT` most hosting platforms set.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for var in ["PORT", "NOTIFYD_PORT"] {
            if let Some(value) = lookup(var) {
                self.port = parse_env(var, &value)?;
            }
        }
        if let Some(value) = lookup("NOTIFYD_BIND") {
            self.bind_address = value;
        }
        if let Some(value) = lookup("NOTIFYD_REDIS_URL") {
            self.redis_url = value;
        }
        if let Some(value) = lookup("NOTIFYD_BACKEND") {
            self.backend = parse_env("NOTIFYD_BACKEND", &value)?;
        }
        if let Some(value) = lookup("NOTIFYD_CHANNEL") {
            self.notification_channel = value;
        }

        Ok(())
    }

    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let keepalive = &self.keepalive;
        if keepalive.pong_wait_ms == 0 {
            return Err(invalid("keepalive.pong_wait_ms must be positive"));
        }
        if keepalive.write_wait_ms == 0 {
            return Err(invalid("keepalive.write_wait_ms must be positive"));
        }
        if keepalive.ping_period().is_zero() || keepalive.ping_period() >= keepalive.pong_wait() {
            return Err(invalid(
                "keepalive.ping_period_ms must be positive and shorter than pong_wait_ms",
            ));
        }

        let limits = &self.limits;
        for (name, value) in [
            ("limits.max_message_size", limits.max_message_size),
            ("limits.outbound_buffer", limits.outbound_buffer),
            ("limits.inbound_buffer", limits.inbound_buffer),
            ("limits.hub_command_buffer", limits.hub_command_buffer),
            ("limits.cluster_command_buffer", limits.cluster_command_buffer),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{name} must be positive")));
            }
        }

        if self.notification_channel.trim().is_empty() {
            return Err(invalid("notification_channel must not be empty"));
        }
        if !self.ws_path.starts_with('/') {
            return Err(invalid("ws_path must start with '/'"));
        }
        if !self.seed_keys.is_empty() && self.backend != Backend::Memory {
            return Err(invalid("seed_keys only apply to the memory backend"));
        }
        if self.seed_keys.iter().any(|seed| seed.key.trim().is_empty()) {
            return Err(invalid("seed_keys entries need a non-empty key"));
        }

        self.socket_addr().map(|_| ())
    }

    /// Address the HTTP listener binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| invalid(&format!("bind_address {:?} is not an IP address", self.bind_address)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Buffer sizes for the room actors.
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            cluster_buffer: self.limits.cluster_command_buffer,
            hub_buffer: self.limits.hub_command_buffer,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn parse_env<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}
