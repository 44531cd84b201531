//! Accept, route and relay, end to end
//!
//! The listener's destination lookup is replaced so every accepted socket
//! reports a fixed pre-NAT destination, and the client connects from
//! 127.0.0.1, which the in-memory runtime assigns to the declaring container.

use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use connectable::config::ConnectionConfig;
use connectable::connection::{run_accept_loop, ConnectionManager};
use connectable::error::InterceptError;
use connectable::intercept::InterceptListener;
use connectable::resolver::{
    AddressResolver, BackendResolver, ChainResolver, Router, SourceCache, StaticResolver,
};
use connectable::runtime::{ContainerDescriptor, InMemoryRuntime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::spawn_echo_backend;

const LOOPBACK: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

fn redirected_from_8080(_fd: RawFd) -> Result<SocketAddr, InterceptError> {
    Ok(SocketAddr::new(LOOPBACK, 8080))
}

fn not_redirected(_fd: RawFd) -> Result<SocketAddr, InterceptError> {
    Err(InterceptError::OriginalDstError(
        "no NAT entry for socket".into(),
    ))
}

struct Proxy {
    addr: SocketAddr,
    manager: Arc<ConnectionManager>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start_proxy(
    runtime: &InMemoryRuntime,
    addresses: Arc<dyn AddressResolver>,
    lookup: fn(RawFd) -> Result<SocketAddr, InterceptError>,
    cache: Option<Arc<SourceCache>>,
) -> Proxy {
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener = InterceptListener::with_lookup(tcp, lookup).unwrap();
    let addr = listener.listen_addr();

    let backends = match cache {
        Some(cache) => BackendResolver::with_cache(Arc::new(runtime.clone()), cache),
        None => BackendResolver::new(Arc::new(runtime.clone())),
    };
    let router = Arc::new(Router::new(backends, addresses));
    let config = ConnectionConfig {
        max_connections: 16,
        connect_timeout_secs: 2,
        buffer_size: 16 * 1024,
        drain_timeout_secs: 1,
    };
    let manager = Arc::new(ConnectionManager::new(&config, router));

    let loop_manager = Arc::clone(&manager);
    let task = tokio::spawn(async move {
        let _ = run_accept_loop(listener, loop_manager).await;
    });

    Proxy {
        addr,
        manager,
        task,
    }
}

fn web1() -> ContainerDescriptor {
    ContainerDescriptor::new("web1", Some(LOOPBACK)).with_label("connect[8080]", "api1")
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Send `payload`, half-close, and collect everything until EOF
async fn round_trip(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(addr).await.unwrap();
    // The proxy may already have closed the socket
    let _ = client.write_all(payload).await;
    let _ = client.shutdown().await;

    let mut got = Vec::new();
    let _ = timeout(Duration::from_secs(5), client.read_to_end(&mut got))
        .await
        .expect("proxy did not close the connection");
    got
}

#[tokio::test]
async fn test_labelled_container_reaches_its_backend() {
    let (backend, _backend_task) = spawn_echo_backend().await;
    let runtime = InMemoryRuntime::new();
    runtime.add_container(web1());

    let addresses = Arc::new(StaticResolver::default().with_backend("api1", vec![backend.to_string()]));
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, None).await;

    let got = round_trip(proxy.addr, b"GET / HTTP/1.0\r\n\r\n").await;
    assert_eq!(got, b"GET / HTTP/1.0\r\n\r\n");

    let stats = proxy.manager.stats();
    wait_for(|| stats.completed() == 1).await;
    let snapshot = proxy.manager.stats_snapshot();
    assert_eq!(snapshot.total_accepted, 1);
    assert_eq!(snapshot.bytes_client_to_backend, 18);
    assert_eq!(snapshot.bytes_backend_to_client, 18);
    assert_eq!(snapshot.active, 0);
}

#[tokio::test]
async fn test_unrecoverable_destination_closes_without_dialing() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let runtime = InMemoryRuntime::new();
    runtime.add_container(web1());

    let addresses = Arc::new(
        StaticResolver::default().with_backend("api1", vec![backend.local_addr().unwrap().to_string()]),
    );
    let proxy = start_proxy(&runtime, addresses, not_redirected, None).await;

    let got = round_trip(proxy.addr, b"hello").await;
    assert!(got.is_empty());

    // The connection never reached routing
    assert_eq!(proxy.manager.stats_snapshot().total_accepted, 0);
    assert!(timeout(Duration::from_millis(100), backend.accept()).await.is_err());

    // The accept loop keeps serving
    let got = round_trip(proxy.addr, b"again").await;
    assert!(got.is_empty());
    assert!(!proxy.task.is_finished());
}

#[tokio::test]
async fn test_missing_label_closes_connection() {
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let runtime = InMemoryRuntime::new();
    runtime.add_container(
        ContainerDescriptor::new("web1", Some(LOOPBACK)).with_label("connect[9090]", "api1"),
    );

    let addresses = Arc::new(
        StaticResolver::default().with_backend("api1", vec![backend.local_addr().unwrap().to_string()]),
    );
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, None).await;

    let got = round_trip(proxy.addr, b"hello").await;
    assert!(got.is_empty());

    let stats = proxy.manager.stats();
    wait_for(|| stats.unrouted() == 1).await;
    assert_eq!(stats.completed(), 0);
    assert!(timeout(Duration::from_millis(100), backend.accept()).await.is_err());
}

#[tokio::test]
async fn test_unknown_source_closes_connection() {
    let runtime = InMemoryRuntime::new();
    runtime.add_container(
        ContainerDescriptor::new("web9", Some("172.17.0.9".parse().unwrap()))
            .with_label("connect[8080]", "api1"),
    );

    let addresses = Arc::new(StaticResolver::default().with_backend("api1", vec!["127.0.0.1:1".into()]));
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, None).await;

    let got = round_trip(proxy.addr, b"hello").await;
    assert!(got.is_empty());

    let stats = proxy.manager.stats();
    wait_for(|| stats.unrouted() == 1).await;
    assert_eq!(stats.errored(), 0);
}

#[tokio::test]
async fn test_empty_address_list_closes_without_dialing() {
    let runtime = InMemoryRuntime::new();
    runtime.add_container(web1());

    let addresses = Arc::new(ChainResolver::new(vec![Arc::new(
        StaticResolver::default().with_backend("api1", Vec::new()),
    )]));
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, None).await;

    let got = round_trip(proxy.addr, b"hello").await;
    assert!(got.is_empty());

    let stats = proxy.manager.stats();
    wait_for(|| stats.unrouted() == 1).await;
    assert_eq!(stats.errored(), 0);
    assert_eq!(stats.completed(), 0);
}

#[tokio::test]
async fn test_unreachable_backend_counts_as_error() {
    // Bind then drop to get a port nothing listens on
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

    let runtime = InMemoryRuntime::new();
    runtime.add_container(web1());

    let addresses = Arc::new(StaticResolver::default().with_backend("api1", vec![closed.to_string()]));
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, None).await;

    let got = round_trip(proxy.addr, b"hello").await;
    assert!(got.is_empty());

    let stats = proxy.manager.stats();
    wait_for(|| stats.errored() == 1).await;
    assert_eq!(stats.active(), 0);
}

#[tokio::test]
async fn test_cached_source_lookup_serves_repeat_connections() {
    let (backend, _backend_task) = spawn_echo_backend().await;
    let runtime = InMemoryRuntime::new();
    runtime.add_container(web1());

    let cache = Arc::new(SourceCache::new());
    let addresses = Arc::new(StaticResolver::default().with_backend("api1", vec![backend.to_string()]));
    let proxy = start_proxy(&runtime, addresses, redirected_from_8080, Some(Arc::clone(&cache))).await;

    for payload in [&b"one"[..], b"two", b"three"] {
        assert_eq!(round_trip(proxy.addr, payload).await, payload);
    }

    let stats = proxy.manager.stats();
    wait_for(|| stats.completed() == 3).await;
    let cache_stats = cache.stats();
    assert_eq!(cache_stats.misses, 1);
    assert_eq!(cache_stats.hits, 2);
}
