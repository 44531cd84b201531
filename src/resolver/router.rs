//! Connection routing: backend resolution followed by address resolution

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use super::address::AddressResolver;
use super::backend::BackendResolver;
use crate::error::ResolveError;

/// A resolved route for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Backend identifier declared by the source container
    pub backend: String,
    /// Address to dial, the first one the address resolver returned
    pub address: String,
}

/// Resolves a connection's `(source IP, original port)` to a dial address
pub struct Router {
    backends: BackendResolver,
    addresses: Arc<dyn AddressResolver>,
}

impl Router {
    /// Create a router
    #[must_use]
    pub fn new(backends: BackendResolver, addresses: Arc<dyn AddressResolver>) -> Self {
        Self {
            backends,
            addresses,
        }
    }

    /// The backend resolver
    #[must_use]
    pub const fn backends(&self) -> &BackendResolver {
        &self.backends
    }

    /// Resolve the route for traffic from `source` to original port `port`.
    ///
    /// # Errors
    ///
    /// Any backend resolution error, the address resolver's error, or
    /// `ResolveError::NoAddress` if it returned an empty list.
    pub async fn route(&self, source: IpAddr, port: u16) -> Result<Route, ResolveError> {
        let backend = self.backends.resolve(source, port).await?;

        let addrs = self.addresses.resolve(&backend).await?;
        let Some(address) = addrs.into_iter().next() else {
            return Err(ResolveError::NoAddress { backend });
        };

        debug!("Routed {}:{} via {} to {}", source, port, backend, address);
        Ok(Route { backend, address })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("backends", &self.backends)
            .field("addresses", &self.addresses.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticResolver;
    use crate::runtime::{ContainerDescriptor, InMemoryRuntime};

    fn router(addrs: Vec<String>) -> Router {
        let rt = InMemoryRuntime::new();
        rt.add_container(
            ContainerDescriptor::new("web1", Some("172.17.0.3".parse().unwrap()))
                .with_label("connect[8080]", "api1"),
        );
        Router::new(
            BackendResolver::new(Arc::new(rt)),
            Arc::new(StaticResolver::default().with_backend("api1", addrs)),
        )
    }

    #[tokio::test]
    async fn test_route_takes_first_address() {
        let router = router(vec!["10.0.0.5:9090".into(), "10.0.0.6:9090".into()]);
        let route = router.route("172.17.0.3".parse().unwrap(), 8080).await.unwrap();
        assert_eq!(route.backend, "api1");
        assert_eq!(route.address, "10.0.0.5:9090");
    }

    #[tokio::test]
    async fn test_empty_address_list_is_no_route() {
        let router = router(Vec::new());
        let err = router
            .route("172.17.0.3".parse().unwrap(), 8080)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoAddress { ref backend } if backend == "api1"));
    }
}
