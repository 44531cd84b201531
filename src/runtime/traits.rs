//! Container runtime trait

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::types::{ContainerDescriptor, HelperSpec, RuntimeEvent};
use crate::error::RuntimeError;

/// Stream of container lifecycle events
///
/// The stream ending, or yielding an error, means the subscription is gone
/// and must be re-established.
pub type EventStream = BoxStream<'static, Result<RuntimeEvent, RuntimeError>>;

/// Container runtime operations consumed by the proxy
///
/// Every call may fail; callers decide whether a failure is fatal.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// IDs of all containers known to the runtime
    async fn list_containers(&self) -> Result<Vec<String>, RuntimeError>;

    /// Full descriptor of one container.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::NotFound` if the container does not exist.
    async fn inspect_container(&self, id: &str) -> Result<ContainerDescriptor, RuntimeError>;

    /// Create a helper container, returning its ID
    async fn create_container(&self, spec: &HelperSpec) -> Result<String, RuntimeError>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Wait for a container to exit and return its exit status
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Force-remove a container
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Subscribe to container lifecycle events
    async fn events(&self) -> Result<EventStream, RuntimeError>;

    /// Short name of this runtime for log lines
    fn name(&self) -> &str;
}
