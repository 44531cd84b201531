//! Connection interception
//!
//! Traffic reaches the proxy only because a NAT rule rewrote its destination:
//! a PREROUTING `REDIRECT` on the proxy's container for inbound TCP, or an
//! OUTPUT `DNAT` inside a client container for local-to-local traffic. The
//! kernel remembers the pre-rewrite destination in its connection tracking
//! table, and `SO_ORIGINAL_DST` reads it back for an accepted socket.
//!
//! Recovery happens exactly once, at accept time, and is what makes an
//! [`InterceptedConnection`]. A connection whose socket has no NAT entry never
//! becomes one: it is logged and closed by the accept loop.
//!
//! # Usage
//!
//! ```no_run
//! use connectable::config::ListenConfig;
//! use connectable::intercept::InterceptListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = InterceptListener::bind(&ListenConfig::default())?;
//!
//! loop {
//!     let conn = listener.accept().await?;
//!     println!("{} -> original port {}", conn.client_addr(), conn.original_dst_port());
//! }
//! # }
//! ```

mod connection;
mod listener;
mod socket;

pub use connection::InterceptedConnection;
pub use listener::{DestinationLookup, InterceptListener};
pub use socket::{create_listener_socket, get_original_dst, SO_ORIGINAL_DST};
