//! Configuration module for connectable
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use connectable::config::load_config_with_env;
//!
//! let config = load_config_with_env("/etc/connectable/config.json").unwrap();
//! println!("Listening on {}", config.listen.address);
//! ```

mod loader;
mod types;

pub use loader::{create_default_config, load_config, load_config_str, load_config_with_env};
pub use types::{
    Config, ConnectionConfig, FirewallConfig, ListenConfig, LogConfig, MonitorConfig,
    ResolverConfig, RuntimeConfig, DEFAULT_LISTEN_PORT,
};
