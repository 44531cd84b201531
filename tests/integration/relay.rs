//! Relay behaviour over real TCP sockets

use std::time::Duration;

use connectable::io::relay;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Connected (client, proxy-side) socket pair
async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

/// Write `data`, shut down the write side and read until EOF, concurrently
async fn exchange(mut stream: TcpStream, data: Vec<u8>) -> Vec<u8> {
    let (mut rd, mut wr) = stream.split();
    let write = async {
        wr.write_all(&data).await.unwrap();
        wr.shutdown().await.unwrap();
    };
    let read = async {
        let mut got = Vec::new();
        rd.read_to_end(&mut got).await.unwrap();
        got
    };
    let ((), got) = tokio::join!(write, read);
    got
}

#[tokio::test]
async fn test_relay_delivers_everything_in_both_directions() {
    let (client, mut proxy_client_side) = socket_pair().await;
    let (backend, mut proxy_backend_side) = socket_pair().await;

    let relay_task =
        tokio::spawn(async move { relay(&mut proxy_client_side, &mut proxy_backend_side).await });

    let upload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let download: Vec<u8> = (0..150_000u32).map(|i| (i % 241) as u8).collect();

    let client_task = tokio::spawn(exchange(client, upload.clone()));
    let backend_task = tokio::spawn(exchange(backend, download.clone()));

    let client_got = timeout(Duration::from_secs(10), client_task)
        .await
        .unwrap()
        .unwrap();
    let backend_got = timeout(Duration::from_secs(10), backend_task)
        .await
        .unwrap()
        .unwrap();
    let result = timeout(Duration::from_secs(10), relay_task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(backend_got, upload);
    assert_eq!(client_got, download);
    assert_eq!(result.client_to_backend, 200_000);
    assert_eq!(result.backend_to_client, 150_000);
    assert!(result.is_clean());
}

#[tokio::test]
async fn test_client_half_close_keeps_download_open() {
    let (mut client, mut proxy_client_side) = socket_pair().await;
    let (mut backend, mut proxy_backend_side) = socket_pair().await;

    let relay_task =
        tokio::spawn(async move { relay(&mut proxy_client_side, &mut proxy_backend_side).await });

    client.write_all(b"request").await.unwrap();
    client.shutdown().await.unwrap();

    // Backend sees the request followed by EOF
    let mut request = Vec::new();
    timeout(Duration::from_secs(5), backend.read_to_end(&mut request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request, b"request");
    assert!(!relay_task.is_finished());

    // Backend keeps answering after the client's EOF
    backend.write_all(b"response ").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    backend.write_all(b"after eof").await.unwrap();
    backend.shutdown().await.unwrap();

    let mut response = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, b"response after eof");

    let result = timeout(Duration::from_secs(5), relay_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.client_to_backend, 7);
    assert_eq!(result.backend_to_client, 18);
}

#[tokio::test]
async fn test_backend_half_close_keeps_upload_open() {
    let (mut client, mut proxy_client_side) = socket_pair().await;
    let (mut backend, mut proxy_backend_side) = socket_pair().await;

    let relay_task =
        tokio::spawn(async move { relay(&mut proxy_client_side, &mut proxy_backend_side).await });

    // Backend greets and closes its write side first
    backend.write_all(b"banner").await.unwrap();
    backend.shutdown().await.unwrap();

    let mut banner = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut banner))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(banner, b"banner");

    client.write_all(b"late upload").await.unwrap();
    client.shutdown().await.unwrap();

    let mut upload = Vec::new();
    timeout(Duration::from_secs(5), backend.read_to_end(&mut upload))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(upload, b"late upload");

    let result = timeout(Duration::from_secs(5), relay_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.total(), 17);
}
