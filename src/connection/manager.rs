//! Connection Manager
//!
//! This module provides centralized connection management including:
//! - Routing each intercepted connection before a relay is started
//! - Connection limiting via semaphore-based backpressure
//! - Graceful shutdown with connection draining

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::stats::{ConnectionStats, StatsSnapshot};
use super::tcp::{spawn_tcp_handler, TcpConnectionContext};
use crate::config::ConnectionConfig;
use crate::error::{ConnectableError, ConnectionError, InterceptError};
use crate::intercept::{InterceptListener, InterceptedConnection};
use crate::resolver::Router;

/// Connection manager for handling concurrent connections
pub struct ConnectionManager {
    /// Semaphore for connection limiting
    semaphore: Arc<Semaphore>,

    /// Maximum connections allowed
    max_connections: usize,

    /// Connection statistics
    stats: Arc<ConnectionStats>,

    /// Backend and address resolution
    router: Arc<Router>,

    /// Connect timeout for backend dials
    connect_timeout: Duration,

    /// Buffer size
    buffer_size: usize,

    /// Drain timeout for graceful shutdown
    drain_timeout: Duration,

    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,

    /// Whether shutdown has been initiated
    shutting_down: AtomicBool,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(config: &ConnectionConfig, router: Arc<Router>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            stats: Arc::new(ConnectionStats::new()),
            router,
            connect_timeout: config.connect_timeout(),
            buffer_size: config.buffer_size,
            drain_timeout: config.drain_timeout(),
            shutdown_tx,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Route a connection and spawn its relay.
    ///
    /// Resolution runs on the caller's task; only the dial and relay are
    /// spawned. A connection without a route is closed here and never
    /// reaches the dial.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::ShuttingDown` after shutdown started
    /// - `ConnectionError::LimitReached` if no connection slot is free
    /// - `ConnectionError::Unrouted` if backend or address resolution failed
    pub async fn handle_connection(
        &self,
        conn: InterceptedConnection,
    ) -> Result<(), ConnectionError> {
        if self.shutting_down.load(Ordering::Relaxed) {
            return Err(ConnectionError::ShuttingDown);
        }

        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            self.stats.record_rejected();
            let current = self.max_connections - self.semaphore.available_permits();
            warn!(
                "Connection limit reached ({}/{}), rejecting connection from {}",
                current,
                self.max_connections,
                conn.client_addr()
            );
            return Err(ConnectionError::limit_reached(current, self.max_connections));
        };

        self.stats.record_accepted();

        let client_addr = conn.client_addr();
        let route = match self
            .router
            .route(conn.client_ip(), conn.original_dst_port())
            .await
        {
            Ok(route) => route,
            Err(e) => {
                self.stats.record_unrouted();
                warn!("Dropping connection from {}: {}", client_addr, e);
                return Err(ConnectionError::Unrouted {
                    client: client_addr,
                    reason: e.to_string(),
                });
            }
        };

        debug!(
            "Routing {} (original port {}) to {} (active: {}/{})",
            client_addr,
            conn.original_dst_port(),
            route.address,
            self.stats.active(),
            self.max_connections
        );

        let ctx = TcpConnectionContext {
            conn,
            route,
            connect_timeout: self.connect_timeout,
            buffer_size: self.buffer_size,
        };

        let stats = Arc::clone(&self.stats);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            // Hold the permit until the connection is done
            let _permit = permit;
            let handler = spawn_tcp_handler(ctx, Arc::clone(&stats));
            watch_handler(handler, shutdown_rx, &stats).await;
        });

        Ok(())
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get a snapshot of current statistics
    #[must_use]
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Get current active connection count
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Get available connection slots
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Check if at capacity
    #[must_use]
    pub fn at_capacity(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Maximum concurrent connections
    #[must_use]
    pub const fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Initiate graceful shutdown
    ///
    /// New connections are refused, active relays get up to the drain
    /// timeout to finish, and whatever is still running afterwards is
    /// cancelled.
    pub async fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        info!("Initiating connection manager shutdown");

        let drain_start = std::time::Instant::now();
        let check_interval = Duration::from_millis(100);

        while drain_start.elapsed() < self.drain_timeout {
            let active = self.active_connections();
            if active == 0 {
                info!("All connections drained");
                return;
            }

            debug!(
                "Waiting for {} connections to drain ({:.1}s remaining)",
                active,
                self.drain_timeout
                    .saturating_sub(drain_start.elapsed())
                    .as_secs_f64()
            );

            tokio::time::sleep(check_interval).await;
        }

        let remaining = self.active_connections();
        if remaining > 0 {
            warn!(
                "Drain timeout reached with {} connections still active, closing them",
                remaining
            );
        }
        let _ = self.shutdown_tx.send(());
    }

    /// Check if shutting down
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_connections", &self.max_connections)
            .field("active", &self.active_connections())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

/// Wait for a connection handler, cancelling it when the drain window ends.
///
/// The handler records its own outcome; only a handler that was actually
/// cancelled is counted here.
async fn watch_handler(
    mut handler: JoinHandle<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    stats: &ConnectionStats,
) {
    tokio::select! {
        biased;
        _ = &mut handler => {}
        _ = shutdown_rx.recv() => {
            handler.abort();
            if handler.await.is_err() {
                debug!("Relay cancelled at end of drain window");
                stats.record_error(0, 0);
            }
        }
    }
}

/// Run the connection accept loop
///
/// Each accepted connection is routed on this task and its relay spawned,
/// so a slow relay never blocks the next accept. Connections whose original
/// destination cannot be recovered are logged and dropped.
///
/// # Errors
///
/// Returns an error only for non-recoverable listener failures.
pub async fn run_accept_loop(
    listener: InterceptListener,
    manager: Arc<ConnectionManager>,
) -> Result<(), ConnectableError> {
    info!(
        "Starting accept loop on {} (max {} connections)",
        listener.listen_addr(),
        manager.max_connections
    );

    loop {
        if manager.is_shutting_down() {
            info!("Accept loop stopping due to shutdown");
            break;
        }

        match listener.accept().await {
            Ok(conn) => {
                if let Err(e) = manager.handle_connection(conn).await {
                    debug!("Connection not relayed: {}", e);
                }
            }
            Err(InterceptError::OriginalDstError(reason)) => {
                warn!("Unable to determine destination port: {}", reason);
            }
            Err(e) if e.is_recoverable() => {
                debug!("Recoverable accept error: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
