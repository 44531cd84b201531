//! Self discovery
//!
//! The proxy runs inside a container and needs its own descriptor: the IP
//! that DNAT rules point at, the image used for helper containers, and the
//! network mode that decides whether the inbound redirect is installed.

use std::fmt;
use std::net::IpAddr;

use tracing::{debug, warn};

use super::traits::ContainerRuntime;
use super::types::{ContainerDescriptor, NetworkMode};
use crate::error::RuntimeError;

/// The proxy's own container, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfDescriptor {
    /// Container ID
    pub container_id: String,
    /// Address on the bridge network
    pub ip_address: Option<IpAddr>,
    /// Image the proxy runs, reused for helper containers
    pub image: String,
    /// Network mode
    pub network_mode: NetworkMode,
}

impl From<ContainerDescriptor> for SelfDescriptor {
    fn from(desc: ContainerDescriptor) -> Self {
        Self {
            container_id: desc.id,
            ip_address: desc.ip_address,
            image: desc.image,
            network_mode: desc.network_mode,
        }
    }
}

impl fmt::Display for SelfDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.container_id, self.network_mode)
    }
}

/// Find the container whose hostname is `hostname`.
///
/// Containers that fail to inspect are skipped; they may have exited between
/// the list and the inspect.
///
/// # Errors
///
/// Returns `RuntimeError::NotFound` if no container matches, or the list
/// error if the runtime cannot enumerate containers.
pub async fn locate_self(
    runtime: &dyn ContainerRuntime,
    hostname: &str,
) -> Result<SelfDescriptor, RuntimeError> {
    for id in runtime.list_containers().await? {
        let desc = match runtime.inspect_container(&id).await {
            Ok(desc) => desc,
            Err(e) => {
                warn!("Skipping container {} during self lookup: {}", id, e);
                continue;
            }
        };

        if desc.hostname == hostname {
            debug!("Hostname {} matched container {}", hostname, desc.id);
            return Ok(desc.into());
        }
    }

    Err(RuntimeError::not_found(format!("hostname {hostname}")))
}
