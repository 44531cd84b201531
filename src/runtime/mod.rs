//! Container runtime access
//!
//! The proxy learns everything about its environment from the container
//! runtime: which container owns a source address, which backends a container
//! declares through `connect[<port>]` labels, and when containers appear.
//! Nothing is persisted; every answer comes from a live query (optionally
//! memoised by [`crate::resolver::SourceCache`]).
//!
//! - [`ContainerRuntime`]: the API surface the rest of the crate consumes
//! - [`DockerRuntime`]: implementation over the Docker Engine API
//! - [`InMemoryRuntime`]: deterministic implementation for tests and dry runs
//! - [`locate_self`]: finds the proxy's own container at startup

mod discovery;
mod docker;
mod memory;
mod traits;
mod types;

pub use discovery::{locate_self, SelfDescriptor};
pub use docker::DockerRuntime;
pub use memory::{HelperInvocation, InMemoryRuntime};
pub use traits::{ContainerRuntime, EventStream};
pub use types::{
    connect_label, short_id, ContainerDescriptor, EventAction, HelperSpec, NetworkMode,
    RuntimeEvent,
};
