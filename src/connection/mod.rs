//! Connection handling module
//!
//! This module provides connection management, including:
//! - The accept loop that routes intercepted connections
//! - Connection limiting with backpressure
//! - Per-connection dial and relay
//! - Statistics collection and graceful shutdown

mod manager;
mod stats;
mod tcp;

pub use manager::{run_accept_loop, ConnectionManager};
pub use stats::{ConnectionStats, StatsSnapshot};
pub use tcp::{handle_tcp_connection, TcpConnectionContext, TcpConnectionResult};
