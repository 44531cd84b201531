//! Intercept listener
//!
//! Accepts redirected TCP connections and recovers their original destination.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};

use tokio::net::TcpListener;
use tracing::{debug, info};

use super::connection::InterceptedConnection;
use super::socket::{create_listener_socket, get_original_dst};
use crate::config::ListenConfig;
use crate::error::InterceptError;

/// Function used to read a socket's pre-NAT destination
pub type DestinationLookup = fn(RawFd) -> Result<SocketAddr, InterceptError>;

/// TCP listener for NAT-redirected connections
#[derive(Debug)]
pub struct InterceptListener {
    /// The underlying tokio TCP listener
    listener: TcpListener,

    /// Bound address
    listen_addr: SocketAddr,

    /// Original destination lookup, `SO_ORIGINAL_DST` unless replaced
    lookup: DestinationLookup,
}

impl InterceptListener {
    /// Create and bind a new listener.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError` if socket creation or binding fails.
    pub fn bind(config: &ListenConfig) -> Result<Self, InterceptError> {
        let socket = create_listener_socket(config.address, config.backlog)?;

        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| InterceptError::SocketCreation(e.to_string()))?;
        let listen_addr = listener.local_addr()?;

        info!("Listening on {} (backlog={})", listen_addr, config.backlog);

        Ok(Self {
            listener,
            listen_addr,
            lookup: get_original_dst,
        })
    }

    /// Wrap an already bound tokio listener with a custom destination lookup.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError` if the listener's local address is unavailable.
    pub fn with_lookup(
        listener: TcpListener,
        lookup: DestinationLookup,
    ) -> Result<Self, InterceptError> {
        let listen_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            listen_addr,
            lookup,
        })
    }

    /// Accept a new connection and recover its original destination.
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::AcceptError` if accept fails, or
    /// `InterceptError::OriginalDstError` if the accepted socket has no NAT
    /// entry. In the latter case the socket is already closed.
    pub async fn accept(&self) -> Result<InterceptedConnection, InterceptError> {
        let (stream, client_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| InterceptError::AcceptError(e.to_string()))?;

        debug!("Accepted connection from {}", client_addr);

        let original_dst = (self.lookup)(stream.as_raw_fd()).map_err(|e| match e {
            InterceptError::OriginalDstError(reason) => {
                InterceptError::OriginalDstError(format!("{client_addr}: {reason}"))
            }
            other => other,
        })?;

        Ok(InterceptedConnection::with_destination(
            stream,
            client_addr,
            original_dst,
        ))
    }

    /// Get the bound address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// The port NAT rules must redirect to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.listen_addr.port()
    }
}
