//! Intercepted connection representation

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use tokio::net::TcpStream;

/// An accepted TCP connection whose original destination is known
///
/// The original destination is recovered once, when the connection is
/// created, and never changes afterwards.
#[derive(Debug)]
pub struct InterceptedConnection {
    /// The underlying TCP stream
    stream: TcpStream,

    /// Client's address (source)
    client_addr: SocketAddr,

    /// Destination the client addressed before NAT rewrote it
    original_dst: SocketAddr,

    /// When the connection was accepted
    accepted_at: Instant,
}

impl InterceptedConnection {
    /// Create a connection from an accepted stream and its recovered
    /// original destination.
    pub fn with_destination(
        stream: TcpStream,
        client_addr: SocketAddr,
        original_dst: SocketAddr,
    ) -> Self {
        Self {
            stream,
            client_addr,
            original_dst,
            accepted_at: Instant::now(),
        }
    }

    /// Consume the connection and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get the client's source IP, with IPv4-mapped IPv6 addresses unwrapped
    #[must_use]
    pub fn client_ip(&self) -> IpAddr {
        self.client_addr.ip().to_canonical()
    }

    /// Get the original destination address
    #[must_use]
    pub const fn original_dst(&self) -> SocketAddr {
        self.original_dst
    }

    /// Get the original destination's port
    #[must_use]
    pub const fn original_dst_port(&self) -> u16 {
        self.original_dst.port()
    }

    /// Get when the connection was accepted
    #[must_use]
    pub const fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_destination() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, client_addr) = listener.accept().await.unwrap();

        let conn = InterceptedConnection::with_destination(
            server,
            client_addr,
            "172.17.0.4:8080".parse().unwrap(),
        );

        assert_eq!(conn.client_addr(), client_addr);
        assert_eq!(conn.client_ip(), "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(conn.original_dst_port(), 8080);
        assert!(conn.accepted_at().elapsed().as_secs() < 5);

        drop(client);
    }

    #[tokio::test]
    async fn test_client_ip_unwraps_mapped_v6() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let mapped: SocketAddr = "[::ffff:172.17.0.3]:40000".parse().unwrap();
        let conn =
            InterceptedConnection::with_destination(server, mapped, "172.17.0.4:80".parse().unwrap());
        assert_eq!(conn.client_ip(), "172.17.0.3".parse::<IpAddr>().unwrap());
    }
}
