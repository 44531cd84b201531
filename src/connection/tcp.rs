//! Per-connection proxy task
//!
//! Dials the resolved backend and relays bytes until both directions finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn, Instrument};

use super::stats::ConnectionStats;
use crate::error::ConnectionError;
use crate::intercept::InterceptedConnection;
use crate::io::{relay_with_buffer, RelayResult};
use crate::resolver::Route;

/// Everything a proxy task needs
#[derive(Debug)]
pub struct TcpConnectionContext {
    /// The intercepted client connection
    pub conn: InterceptedConnection,

    /// Resolved backend and address
    pub route: Route,

    /// Backend dial timeout
    pub connect_timeout: Duration,

    /// Per-direction relay buffer size
    pub buffer_size: usize,
}

/// Result of handling a TCP connection
#[derive(Debug)]
pub struct TcpConnectionResult {
    /// Client address
    pub client_addr: SocketAddr,
    /// Route the connection took
    pub route: Route,
    /// Relay outcome, if the backend was reached
    pub relay: Option<RelayResult>,
    /// Dial or transfer failure, if any
    pub error: Option<ConnectionError>,
}

impl TcpConnectionResult {
    /// Check if the relay ran and ended cleanly
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.relay.is_some()
    }
}

/// Dial the backend and relay until both sides finish.
///
/// A failed dial closes the client connection immediately.
pub async fn handle_tcp_connection(ctx: TcpConnectionContext) -> TcpConnectionResult {
    let client_addr = ctx.conn.client_addr();
    let mut client = ctx.conn.into_stream();

    let mut result = TcpConnectionResult {
        client_addr,
        route: ctx.route,
        relay: None,
        error: None,
    };

    let mut backend = match dial(&result.route.address, ctx.connect_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("proxy {}", e);
            result.error = Some(e);
            return result;
        }
    };

    let mut relay = relay_with_buffer(&mut client, &mut backend, ctx.buffer_size).await;
    debug!(
        "Connection closed: {} -> {}, {} up / {} down bytes",
        client_addr, result.route.address, relay.client_to_backend, relay.backend_to_client
    );
    result.error = relay
        .error
        .take()
        .map(|e| ConnectionError::transfer(e.to_string()));
    result.relay = Some(relay);

    result
}

async fn dial(address: &str, connect_timeout: Duration) -> Result<TcpStream, ConnectionError> {
    match timeout(connect_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("Failed to set TCP_NODELAY on {}: {}", address, e);
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectionError::dial_failed(address, e.to_string())),
        Err(_) => Err(ConnectionError::dial_failed(
            address,
            format!("timed out after {}s", connect_timeout.as_secs()),
        )),
    }
}

/// Spawn a task to handle a TCP connection inside a `tcp_connection` span
pub fn spawn_tcp_handler(
    ctx: TcpConnectionContext,
    stats: Arc<ConnectionStats>,
) -> tokio::task::JoinHandle<()> {
    let span = tracing::info_span!(
        "tcp_connection",
        client = %ctx.conn.client_addr(),
        backend = %ctx.route.backend,
    );

    info!(
        "{} -> {}",
        ctx.conn.client_addr(),
        ctx.route.address
    );

    tokio::spawn(
        async move {
            let result = handle_tcp_connection(ctx).await;

            match (&result.relay, result.is_success()) {
                (Some(relay), true) => {
                    stats.record_completed(relay.client_to_backend, relay.backend_to_client);
                }
                (Some(relay), false) => {
                    stats.record_error(relay.client_to_backend, relay.backend_to_client);
                }
                (None, _) => stats.record_error(0, 0),
            }
        }
        .instrument(span),
    )
}
