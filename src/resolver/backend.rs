//! Backend resolver
//!
//! Finds the container that owns a connection's source IP and reads the
//! backend it declares for the connection's original destination port.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use super::cache::SourceCache;
use crate::error::{ResolveError, RuntimeError};
use crate::runtime::{connect_label, ContainerDescriptor, ContainerRuntime};

/// Resolves `(source IP, port)` to a backend identifier
pub struct BackendResolver {
    runtime: Arc<dyn ContainerRuntime>,
    cache: Option<Arc<SourceCache>>,
}

impl BackendResolver {
    /// Create a resolver that scans the runtime on every lookup
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            cache: None,
        }
    }

    /// Create a resolver that memoises source containers in `cache`
    #[must_use]
    pub fn with_cache(runtime: Arc<dyn ContainerRuntime>, cache: Arc<SourceCache>) -> Self {
        Self {
            runtime,
            cache: Some(cache),
        }
    }

    /// The cache, if enabled
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<SourceCache>> {
        self.cache.as_ref()
    }

    /// Resolve the backend identifier for traffic from `source` to `port`.
    ///
    /// # Errors
    ///
    /// - `ResolveError::NoSourceContainer` if no container has `source`
    /// - `ResolveError::LabelMissing` if the owner has no `connect[<port>]`
    /// - `ResolveError::Runtime` if the runtime query fails
    pub async fn resolve(&self, source: IpAddr, port: u16) -> Result<String, ResolveError> {
        let source = source.to_canonical();
        let owner = self.find_source(source).await?;

        match owner.backend_for_port(port) {
            Some(backend) => {
                trace!("{}:{} -> backend {}", source, port, backend);
                Ok(backend.to_string())
            }
            None => Err(ResolveError::LabelMissing {
                label: connect_label(port),
                container: owner.id,
            }),
        }
    }

    async fn find_source(&self, source: IpAddr) -> Result<ContainerDescriptor, ResolveError> {
        if let Some(desc) = self.cache.as_ref().and_then(|cache| cache.get(source)) {
            return Ok(desc);
        }
        let generation = self.cache.as_ref().map(|cache| cache.generation());

        for id in self.runtime.list_containers().await? {
            let desc = match self.runtime.inspect_container(&id).await {
                Ok(desc) => desc,
                // Exited between list and inspect
                Err(RuntimeError::NotFound { .. }) => {
                    debug!("Container {} vanished during source scan", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if desc.ip_address.map(|ip| ip.to_canonical()) == Some(source) {
                if let (Some(cache), Some(generation)) = (&self.cache, generation) {
                    cache.insert_if_current(&desc, generation);
                }
                return Ok(desc);
            }
        }

        Err(ResolveError::NoSourceContainer { ip: source })
    }
}

impl std::fmt::Debug for BackendResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendResolver")
            .field("runtime", &self.runtime.name())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}
