//! Configuration types for connectable
//!
//! Every section has defaults, so an empty JSON object (or no file at all)
//! yields a working configuration.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port the proxy listens on when nothing overrides it
pub const DEFAULT_LISTEN_PORT: u16 = 10000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub listen: ListenConfig,

    /// Container runtime connection
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Connection limits and timeouts
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Firewall orchestration
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Lifecycle monitor reconnect policy
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Backend and address resolution
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.runtime.validate()?;
        self.connection.validate()?;
        self.firewall.validate()?;
        self.monitor.validate()?;
        self.resolver.validate()?;
        Ok(())
    }

    /// Create the default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "0.0.0.0:10000")
    #[serde(default = "default_listen_address")]
    pub address: SocketAddr,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl ListenConfig {
    /// Validate listen configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.port() == 0 {
            return Err(ConfigError::ValidationError(
                "listen.address must carry a fixed port; REDIRECT rules point at it".into(),
            ));
        }

        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "listen.backlog must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// The port REDIRECT rules send traffic to
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.address.port()
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            backlog: default_backlog(),
        }
    }
}

/// Container runtime connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Path of the Docker API unix socket
    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    /// Per-request timeout for runtime API calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hostname used to find the proxy's own container (default: `$HOSTNAME`)
    #[serde(default)]
    pub hostname: Option<String>,

    /// Image used for the privileged helper (default: the proxy's own image)
    #[serde(default)]
    pub helper_image: Option<String>,
}

impl RuntimeConfig {
    /// Validate runtime configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.request_timeout_secs must be greater than 0".into(),
            ));
        }

        if matches!(&self.hostname, Some(h) if h.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "runtime.hostname must not be empty".into(),
            ));
        }

        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket: default_docker_socket(),
            request_timeout_secs: default_request_timeout_secs(),
            hostname: None,
            helper_image: None,
        }
    }
}

/// Connection limits and timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Maximum concurrent relayed connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Backend dial timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Buffer size for each relay direction
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Graceful shutdown drain timeout in seconds
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "connection.max_connections must be greater than 0".into(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connection.connect_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.buffer_size < 1024 {
            return Err(ConfigError::ValidationError(
                "connection.buffer_size must be at least 1024".into(),
            ));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get drain timeout as Duration
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            buffer_size: default_buffer_size(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

/// Firewall orchestration configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FirewallConfig {
    /// Upper bound on concurrently running per-container setups
    #[serde(default = "default_max_concurrent_setups")]
    pub max_concurrent_setups: usize,

    /// Deadline for one helper container run (create, start, wait)
    #[serde(default = "default_helper_timeout_secs")]
    pub helper_timeout_secs: u64,
}

impl FirewallConfig {
    /// Validate firewall configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_setups == 0 {
            return Err(ConfigError::ValidationError(
                "firewall.max_concurrent_setups must be greater than 0".into(),
            ));
        }

        if self.helper_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "firewall.helper_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get helper timeout as Duration
    #[must_use]
    pub const fn helper_timeout(&self) -> Duration {
        Duration::from_secs(self.helper_timeout_secs)
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            max_concurrent_setups: default_max_concurrent_setups(),
            helper_timeout_secs: default_helper_timeout_secs(),
        }
    }
}

/// Event-stream reconnect policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// Initial backoff before resubscribing, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Multiplier applied after each failed subscription
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Give up after this many consecutive reconnects (0 = never)
    #[serde(default)]
    pub max_reconnects: u32,
}

impl MonitorConfig {
    /// Validate monitor configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "monitor backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".into(),
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "monitor.backoff_multiplier must be at least 1.0".into(),
            ));
        }

        Ok(())
    }

    /// Backoff delay before reconnect attempt `attempt` (0-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(64) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_reconnects: 0,
        }
    }
}

/// Backend and address resolution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Fixed backend identifier to address list mappings
    #[serde(default)]
    pub static_backends: HashMap<String, Vec<String>>,

    /// Cache source-IP lookups between container events
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
}

impl ResolverConfig {
    /// Validate resolver configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (backend, addrs) in &self.static_backends {
            if backend.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "resolver.static_backends contains an empty backend name".into(),
                ));
            }
            for addr in addrs {
                if !addr.rsplit_once(':').is_some_and(|(host, port)| {
                    !host.is_empty() && port.parse::<u16>().is_ok_and(|p| p != 0)
                }) {
                    return Err(ConfigError::ValidationError(format!(
                        "Backend '{backend}' has invalid address '{addr}' (expected host:port)"
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            static_backends: HashMap::new(),
            cache_enabled: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

// Default value functions for serde
const fn default_true() -> bool {
    true
}

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT))
}

const fn default_backlog() -> u32 {
    1024
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

const fn default_request_timeout_secs() -> u64 {
    120
}

const fn default_max_connections() -> usize {
    65536
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_buffer_size() -> usize {
    64 * 1024
}

const fn default_drain_timeout_secs() -> u64 {
    30
}

const fn default_max_concurrent_setups() -> usize {
    16
}

const fn default_helper_timeout_secs() -> u64 {
    60
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
