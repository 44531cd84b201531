//! connectable: transparent TCP proxy for containers
//!
//! Containers declare the services they consume with labels such as
//! `connect[8080]=api1`. Connections a container makes to port 8080 on a
//! loopback address are DNAT'ed to this proxy, which recovers the original
//! port, looks up the declaring container by source IP, resolves `api1` to
//! an address and relays the bytes.
//!
//! # Architecture
//!
//! ```text
//! web1 ─ connect 127.0.0.1:8080 ─ OUTPUT DNAT ─▶ proxy:8080 ─ PREROUTING REDIRECT ─▶ :10000
//!                                                                                     │
//!                    SO_ORIGINAL_DST ─▶ port 8080 ─▶ source IP ─▶ web1 ─▶ connect[8080] = api1
//!                                                                                     │
//!                                                       api1 ─▶ 10.0.0.5:9090 ◀─ relay┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`connection`]: Accept loop, connection management and statistics
//! - [`error`]: Error types
//! - [`firewall`]: NAT rule scripts and the helper-container orchestrator
//! - [`intercept`]: Listener and original destination recovery
//! - [`io`]: Full-duplex relay
//! - [`monitor`]: Container lifecycle monitor
//! - [`resolver`]: Backend and address resolution
//! - [`runtime`]: Container runtime abstraction and Docker implementation

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod firewall;
pub mod intercept;
pub mod io;
pub mod monitor;
pub mod resolver;
pub mod runtime;

// Re-export commonly used types at the crate root
pub use config::{Config, ListenConfig};
pub use connection::{ConnectionManager, ConnectionStats};
pub use error::{
    ConfigError, ConnectableError, ConnectionError, FirewallError, InterceptError, ResolveError,
    RuntimeError,
};
pub use firewall::FirewallOrchestrator;
pub use intercept::{InterceptListener, InterceptedConnection};
pub use monitor::LifecycleMonitor;
pub use resolver::{AddressResolver, BackendResolver, Router};
pub use runtime::{ContainerRuntime, DockerRuntime, InMemoryRuntime, SelfDescriptor};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
