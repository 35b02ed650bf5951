//! # Node Configuration
//!
//! Unified configuration for the chat node.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. [`NodeConfig::default`]
//! 2. `BITCHAT_*` environment variables ([`NodeConfig::apply_env`])
//! 3. Command line flags (see [`crate::cli`])

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bc_03_network::{ManagerConfig, DEFAULT_RECONNECT_INTERVAL};
use thiserror::Error;

/// Lowest port accepted for the outbound peer.
pub const MIN_SERVER_PORT: u16 = 1024;

/// Environment variable overriding [`NetworkConfig::listen_port`].
pub const ENV_LISTEN_PORT: &str = "BITCHAT_LISTEN_PORT";
/// Environment variable overriding [`NetworkConfig::reconnect_interval`], in seconds.
pub const ENV_RECONNECT_SECS: &str = "BITCHAT_RECONNECT_SECS";
/// Environment variable overriding [`StorageConfig::data_dir`].
pub const ENV_DATA_DIR: &str = "BITCHAT_DATA_DIR";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server address '{0}': expected host:port")]
    MalformedServer(String),

    #[error("invalid server port '{0}': expected 1024-65535")]
    ServerPort(String),

    #[error("cannot resolve server '{addr}': {reason}")]
    Unresolvable { addr: String, reason: String },

    #[error("invalid value '{value}' for {key}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Runtime configuration.
    pub runtime: RuntimeConfig,
}

impl NodeConfig {
    /// Apply `BITCHAT_*` overrides from the process environment.
    pub fn load_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_LISTEN_PORT) {
            self.network.listen_port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_LISTEN_PORT,
                value: port,
            })?;
        }
        if let Some(secs) = lookup(ENV_RECONNECT_SECS) {
            let parsed: u64 = secs.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_RECONNECT_SECS,
                value: secs.clone(),
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidEnv {
                    key: ENV_RECONNECT_SECS,
                    value: secs,
                });
            }
            self.network.reconnect_interval = Duration::from_secs(parsed);
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    /// Network manager settings with the outbound peer resolved.
    pub fn manager_config(&self) -> Result<ManagerConfig, ConfigError> {
        let mut config = ManagerConfig::default();
        config.listen_addr.set_port(self.network.listen_port);
        config.reconnect_interval = self.network.reconnect_interval;
        if let Some(server) = &self.network.server {
            config.outbound = Some(server.resolve()?);
        }
        Ok(config)
    }
}

/// Network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listening port, 0 for an ephemeral one.
    pub listen_port: u16,
    /// The peer this node dials.
    pub server: Option<ServerAddr>,
    /// Delay between outbound connection attempts.
    pub reconnect_interval: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            server: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the block log and the log file.
    pub data_dir: PathBuf,
    /// File prefix shared by `<name>.blockchain` and `<name>.log`.
    pub name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            name: default_name(),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn blockchain_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.blockchain", self.name))
    }

    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.log", self.name))
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Tokio worker threads, also the number of bus workers.
    pub workers: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
        }
    }
}

/// Outbound peer given as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    host: String,
    port: u16,
}

impl ServerAddr {
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// First address the host resolves to.
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let unresolvable = |reason: String| ConfigError::Unresolvable {
            addr: self.to_string(),
            reason,
        };
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| unresolvable(e.to_string()))?
            .next()
            .ok_or_else(|| unresolvable("no addresses".to_string()))
    }
}

impl FromStr for ServerAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::MalformedServer(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ConfigError::MalformedServer(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::ServerPort(port.to_string()))?;
        if port < MIN_SERVER_PORT {
            return Err(ConfigError::ServerPort(port.to_string()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl std::fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Executable stem, falling back to `bitchat`.
fn default_name() -> String {
    std::env::args_os()
        .next()
        .as_deref()
        .map(Path::new)
        .and_then(Path::file_stem)
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("bitchat")
        .to_string()
}
