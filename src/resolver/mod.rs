//! Backend and address resolution
//!
//! Turning an intercepted connection into a dial target takes two steps:
//!
//! 1. [`BackendResolver`]: the container owning the connection's source IP
//!    names a backend identifier through its `connect[<port>]` label
//! 2. [`AddressResolver`]: the backend identifier becomes an ordered list of
//!    `host:port` strings
//!
//! [`Router`] composes both and picks the first address.

mod address;
mod backend;
mod cache;
mod router;

pub use address::{AddressResolver, ChainResolver, HostPortResolver, StaticResolver};
pub use backend::BackendResolver;
pub use cache::{CacheStats, SourceCache};
pub use router::{Route, Router};
