//! Configuration loading and constants.
//!
//! The response contract (status, content type, body) is fixed and lives here as
//! constants. Operational knobs (bind address, worker threads, shutdown grace
//! period, log format) come from built-in defaults, an optional TOML file, and
//! CLI flags, in increasing order of priority. `AppConfig` mirrors the file;
//! `ServerConfig` is the immutable value handed to the listener at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

use crate::error::BindError;

// =============================================================================
// Response Contract
// =============================================================================

/// Body written for every request
pub const RESPONSE_BODY: &str = "OK";

/// Content-Type written for every request
pub const RESPONSE_CONTENT_TYPE: &str = "text/plain";

// =============================================================================
// Listener Defaults
// =============================================================================

/// Port used when no address is configured
pub const DEFAULT_PORT: u16 = 8080;

/// Default bind address: all IPv4 interfaces
pub const DEFAULT_ADDR: &str = formatcp!(":{}", DEFAULT_PORT);

/// How long in-flight requests may run after a stop is requested
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 30;

/// Extra time `stop` waits beyond the grace period before giving up
pub const STOP_TIMEOUT_MARGIN_SECS: u64 = 5;

/// Listen backlog for the bound socket
pub const LISTEN_BACKLOG: i32 = 1024;

// =============================================================================
// Logging Defaults
// =============================================================================

/// Default log filter when neither --log-level nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = formatcp!("{}=info", env!("CARGO_CRATE_NAME"));

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address, `host:port` or `:port`
    #[serde(default = "HttpConfig::default_addr")]
    pub addr: String,
    /// Runtime worker threads (0 = available parallelism)
    #[serde(default)]
    pub workers: usize,
    /// Shutdown grace period in seconds
    #[serde(default = "HttpConfig::default_grace_period")]
    pub grace_period_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            workers: 0,
            grace_period_seconds: Self::default_grace_period(),
        }
    }
}

impl HttpConfig {
    fn default_addr() -> String {
        DEFAULT_ADDR.to_string()
    }

    fn default_grace_period() -> u64 {
        DEFAULT_GRACE_PERIOD_SECS
    }

    /// Effective worker count, never less than one
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Freeze the listener settings into the value passed to `Server::new`.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: self.http.addr.clone(),
            workers: self.http.worker_count(),
            grace_period: Duration::from_secs(self.http.grace_period_seconds),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Immutable listener configuration, fixed at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Bind address as given by the operator
    pub addr: String,
    /// Runtime worker threads
    pub workers: usize,
    /// Window for in-flight requests to finish once stop is requested
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        AppConfig::default().server_config()
    }
}

impl ServerConfig {
    /// Resolve the configured address to a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, BindError> {
        parse_bind_addr(&self.addr)
    }
}

/// Parse `:port`, `host:port`, `[v6]:port` or `localhost:port`.
///
/// An empty host binds every IPv4 interface. Hostnames other than `localhost`
/// are rejected rather than resolved.
pub fn parse_bind_addr(addr: &str) -> Result<SocketAddr, BindError> {
    let invalid = |reason| BindError::InvalidAddress {
        addr: addr.to_string(),
        reason,
    };

    let (host, port) = addr.trim().rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| invalid("port must be a number between 0 and 65535"))?;

    let ip = match host {
        "" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        host => host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host)
            .parse::<IpAddr>()
            .map_err(|_| invalid("host must be an IP address or localhost"))?,
    };

    Ok(SocketAddr::new(ip, port))
}
