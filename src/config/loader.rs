//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::net::SocketAddr;
use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, {} static backends",
        config.listen.address,
        config.resolver.static_backends.len()
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// A missing file is not an error: the built-in defaults are used, so the
/// proxy runs with no configuration at all.
///
/// Environment variables:
/// - `PORT`: Override the listen port
/// - `CONNECTABLE_LISTEN_ADDR`: Override the full listen address
/// - `CONNECTABLE_LOG_LEVEL`: Override log level
/// - `CONNECTABLE_MAX_CONNECTIONS`: Override max connections
/// - `DOCKER_SOCKET`: Override the Docker API socket path
/// - `HOSTNAME`: Hostname used to find the proxy's own container
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        debug!("No configuration at {:?}, using defaults", path);
        Config::default_config()
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    Ok(config)
}

/// Apply overrides from an environment lookup, then re-validate.
pub(crate) fn apply_env_overrides<F>(config: &mut Config, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = env("CONNECTABLE_LISTEN_ADDR") {
        config.listen.address = addr.parse::<SocketAddr>().map_err(|_| ConfigError::EnvError {
            name: "CONNECTABLE_LISTEN_ADDR".into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    // PORT applies after the address so `PORT` alone keeps the bind IP
    if let Some(port) = env("PORT") {
        let port: u16 = port.parse().map_err(|_| ConfigError::EnvError {
            name: "PORT".into(),
            reason: format!("Invalid port: {port}"),
        })?;
        config.listen.address.set_port(port);
        debug!("Listen port overridden to {}", port);
    }

    if let Some(level) = env("CONNECTABLE_LOG_LEVEL") {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(max) = env("CONNECTABLE_MAX_CONNECTIONS") {
        config.connection.max_connections = max.parse().map_err(|_| ConfigError::EnvError {
            name: "CONNECTABLE_MAX_CONNECTIONS".into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!(
            "Max connections overridden to {}",
            config.connection.max_connections
        );
    }

    if let Some(socket) = env("DOCKER_SOCKET") {
        config.runtime.docker_socket = socket.into();
        debug!("Docker socket overridden to {:?}", config.runtime.docker_socket);
    }

    if config.runtime.hostname.is_none() {
        config.runtime.hostname = env("HOSTNAME").filter(|h| !h.is_empty());
    }

    config.validate()
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
