//! Address resolvers
//!
//! An [`AddressResolver`] turns a backend identifier into an ordered list of
//! `host:port` strings. Only the first entry is ever dialed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tracing::trace;

use crate::error::ResolveError;

/// Backend identifier to address list resolution
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve `backend` to `host:port` strings, best first.
    ///
    /// An empty list is a successful answer meaning "no addresses".
    async fn resolve(&self, backend: &str) -> Result<Vec<String>, ResolveError>;

    /// Short name for log lines
    fn name(&self) -> &str;
}

/// Fixed identifier to address mapping
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    backends: HashMap<String, Vec<String>>,
}

impl StaticResolver {
    /// Create a resolver from a mapping
    #[must_use]
    pub fn new(backends: HashMap<String, Vec<String>>) -> Self {
        Self { backends }
    }

    /// Add or replace one mapping
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>, addrs: Vec<String>) -> Self {
        self.backends.insert(backend.into(), addrs);
        self
    }

    /// Number of configured backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if no backends are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, backend: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self.backends.get(backend).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Treats the identifier itself as `host:port` and resolves the host through
/// the system resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPortResolver;

impl HostPortResolver {
    /// Create a resolver
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AddressResolver for HostPortResolver {
    async fn resolve(&self, backend: &str) -> Result<Vec<String>, ResolveError> {
        let (host, port) = backend
            .rsplit_once(':')
            .ok_or_else(|| ResolveError::address_lookup(backend, "missing port"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port
            .parse()
            .map_err(|_| ResolveError::address_lookup(backend, format!("invalid port '{port}'")))?;

        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| ResolveError::address_lookup(backend, e.to_string()))?;

        let resolved: Vec<String> = addrs.map(|addr| addr.to_string()).collect();
        trace!("{} resolved to {:?}", backend, resolved);
        Ok(resolved)
    }

    fn name(&self) -> &str {
        "hostport"
    }
}

/// Tries resolvers in order until one returns a non-empty list
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn AddressResolver>>,
}

impl ChainResolver {
    /// Create a chain
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn AddressResolver>>) -> Self {
        Self { resolvers }
    }
}

impl std::fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.resolvers.iter().map(|r| r.name()).collect();
        f.debug_struct("ChainResolver").field("resolvers", &names).finish()
    }
}

#[async_trait]
impl AddressResolver for ChainResolver {
    /// The first non-empty answer wins. If any resolver failed and none
    /// answered, the last failure is returned; otherwise the result is empty.
    async fn resolve(&self, backend: &str) -> Result<Vec<String>, ResolveError> {
        let mut last_err = None;

        for resolver in &self.resolvers {
            match resolver.resolve(backend).await {
                Ok(addrs) if !addrs.is_empty() => return Ok(addrs),
                Ok(_) => trace!("{} has no addresses for {}", resolver.name(), backend),
                Err(e) => {
                    trace!("{} failed for {}: {}", resolver.name(), backend, e);
                    last_err = Some(e);
                }
            }
        }

        last_err.map_or_else(|| Ok(Vec::new()), Err)
    }

    fn name(&self) -> &str {
        "chain"
    }
}
