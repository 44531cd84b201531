//! Error types for connectable
//!
//! Errors are grouped by subsystem. Every subsystem error reports whether the
//! failed operation is worth attempting again, which the accept loop and the
//! lifecycle monitor use to decide between "log and continue" and "abort".

use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

/// Top-level error type for connectable
#[derive(Debug, Error)]
pub enum ConnectableError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Listener and original-destination errors
    #[error("Intercept error: {0}")]
    Intercept(#[from] InterceptError),

    /// Container runtime API errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Backend or address resolution errors
    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// Firewall rule installation errors
    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),

    /// Connection handling errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectableError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Intercept(e) => e.is_recoverable(),
            Self::Runtime(e) => e.is_recoverable(),
            Self::Resolve(e) => e.is_recoverable(),
            Self::Firewall(e) => e.is_recoverable(),
            Self::Connection(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Listener and original destination errors
#[derive(Debug, Error)]
pub enum InterceptError {
    /// Failed to create socket
    #[error("Failed to create listening socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept connection
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// The socket has no NAT table entry (not redirected, or unsupported platform)
    #[error("Failed to get original destination: {0}")]
    OriginalDstError(String),

    /// I/O error
    #[error("Intercept I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl InterceptError {
    /// Check if this error is recoverable
    ///
    /// A missing original destination only affects the connection it was
    /// queried for, so the accept loop keeps running.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SocketCreation(_) | Self::SocketOption { .. } | Self::BindError { .. } => false,
            Self::AcceptError(_) | Self::OriginalDstError(_) => true,
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Container runtime API errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Could not connect to the runtime endpoint
    #[error("Failed to connect to container runtime at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// An API call returned an error
    #[error("Container runtime call {op} failed: {reason}")]
    Api { op: &'static str, reason: String },

    /// The referenced container does not exist
    #[error("Container not found: {id}")]
    NotFound { id: String },

    /// The event subscription ended
    #[error("Container event stream closed")]
    EventStreamClosed,

    /// An API call did not finish in time
    #[error("Container runtime call {op} timed out after {timeout_secs}s")]
    Timeout { op: &'static str, timeout_secs: u64 },
}

impl RuntimeError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Connect { .. } => false,
            Self::Api { .. } | Self::EventStreamClosed | Self::Timeout { .. } => true,
            Self::NotFound { .. } => false,
        }
    }

    /// Create an API error
    pub fn api(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Api {
            op,
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Backend and address resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No container owns the connection's source address
    #[error("Unable to find container with source IP {ip}")]
    NoSourceContainer { ip: IpAddr },

    /// The source container does not declare a backend for the port
    #[error("Connect label '{label}' not found on container {container}")]
    LabelMissing { label: String, container: String },

    /// Runtime query failed while scanning containers
    #[error("Container lookup failed: {0}")]
    Runtime(#[from] RuntimeError),

    /// The address resolver failed for a backend
    #[error("Failed to resolve backend '{backend}': {reason}")]
    AddressLookup { backend: String, reason: String },

    /// The address resolver returned no addresses
    #[error("No addresses for backend '{backend}'")]
    NoAddress { backend: String },
}

impl ResolveError {
    /// Resolution errors never retry within a connection; a new client
    /// connection re-runs resolution from scratch.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Runtime(e) => e.is_recoverable(),
            Self::NoSourceContainer { .. }
            | Self::LabelMissing { .. }
            | Self::AddressLookup { .. }
            | Self::NoAddress { .. } => false,
        }
    }

    /// Create an address lookup error
    pub fn address_lookup(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::AddressLookup {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Firewall rule installation errors
#[derive(Debug, Error)]
pub enum FirewallError {
    /// The helper container exited non-zero
    #[error("Helper for container {container} exited with status {code}")]
    HelperExit { container: String, code: i64 },

    /// The helper did not finish in time
    #[error("Helper for container {container} timed out after {timeout_secs}s")]
    HelperTimeout { container: String, timeout_secs: u64 },

    /// The proxy's own container has no address to DNAT to
    #[error("Proxy container {container} has no IP address")]
    MissingProxyAddress { container: String },

    /// Runtime API failure while running the helper
    #[error("Runtime failure during firewall setup: {0}")]
    Runtime(#[from] RuntimeError),
}

impl FirewallError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::HelperExit { .. } | Self::MissingProxyAddress { .. } => false,
            Self::HelperTimeout { .. } => true,
            Self::Runtime(e) => e.is_recoverable(),
        }
    }
}

/// Connection handling errors
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection pool exhausted
    #[error("Connection limit reached ({current}/{max})")]
    LimitReached { current: usize, max: usize },

    /// No route for the connection
    #[error("Connection from {client} not routed: {reason}")]
    Unrouted { client: SocketAddr, reason: String },

    /// Dialing the backend failed
    #[error("Failed to dial backend {addr}: {reason}")]
    DialFailed { addr: String, reason: String },

    /// Copy error during bidirectional transfer
    #[error("Data transfer error: {0}")]
    TransferError(String),

    /// Shutdown in progress
    #[error("Server is shutting down")]
    ShuttingDown,
}

impl ConnectionError {
    /// Check if this error is recoverable
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::LimitReached { .. } => true,
            Self::Unrouted { .. } | Self::DialFailed { .. } | Self::TransferError(_) => false,
            Self::ShuttingDown => false,
        }
    }

    /// Create a limit reached error
    pub const fn limit_reached(current: usize, max: usize) -> Self {
        Self::LimitReached { current, max }
    }

    /// Create a dial error
    pub fn dial_failed(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DialFailed {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a transfer error
    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::TransferError(msg.into())
    }
}

/// Type alias for Result with `ConnectableError`
pub type Result<T> = std::result::Result<T, ConnectableError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!config_err.is_recoverable());

        // A socket without a NAT entry only drops that connection
        let dst_err = InterceptError::OriginalDstError("ENOENT".into());
        assert!(dst_err.is_recoverable());

        let bind_err = InterceptError::bind("0.0.0.0:10000".parse().unwrap(), "in use");
        assert!(!bind_err.is_recoverable());

        let label_err = ResolveError::LabelMissing {
            label: "connect[8080]".into(),
            container: "web1".into(),
        };
        assert!(!label_err.is_recoverable());

        let fw_err = FirewallError::HelperExit {
            container: "abc".into(),
            code: 1,
        };
        assert!(!fw_err.is_recoverable());

        assert!(RuntimeError::EventStreamClosed.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ResolveError::LabelMissing {
            label: "connect[8080]".into(),
            container: "web1".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("connect[8080]"));
        assert!(msg.contains("web1"));

        let err = ConnectionError::dial_failed("10.0.0.5:9090", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.5:9090"));
        assert!(msg.contains("connection refused"));

        let err = RuntimeError::Timeout {
            op: "inspect_container",
            timeout_secs: 120,
        };
        assert!(err.to_string().contains("timed out after 120s"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        let err: ConnectableError = io_err.into();
        assert!(err.is_recoverable());

        let config_err = ConfigError::ValidationError("invalid".into());
        let err: ConnectableError = config_err.into();
        assert!(!err.is_recoverable());

        let runtime_err = RuntimeError::api("list_containers", "socket closed");
        let err: ResolveError = runtime_err.into();
        assert!(err.is_recoverable());
    }
}
