//! Full-duplex relay with two-phase half-close
//!
//! Each direction copies until its reader reaches EOF or fails, then shuts
//! down the write side of its destination. The other direction keeps
//! running, so a peer that has finished sending can still receive. The relay
//! completes only when both directions have shut down.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, trace};

/// Default per-direction buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Outcome of a finished relay
#[derive(Debug)]
pub struct RelayResult {
    /// Bytes copied from client to backend
    pub client_to_backend: u64,
    /// Bytes copied from backend to client
    pub backend_to_client: u64,
    /// First read or write error seen in either direction
    pub error: Option<io::Error>,
}

impl RelayResult {
    /// Total bytes copied in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_backend + self.backend_to_client
    }

    /// Check if both directions ended with a clean EOF
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Copying,
    ShuttingDown,
    Done,
}

/// One direction of the relay
struct HalfRelay {
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    bytes: u64,
    phase: Phase,
    error: Option<io::Error>,
}

impl HalfRelay {
    fn new(buf_size: usize) -> Self {
        Self {
            buf: vec![0u8; buf_size].into_boxed_slice(),
            pos: 0,
            cap: 0,
            bytes: 0,
            phase: Phase::Copying,
            error: None,
        }
    }

    fn fail(&mut self, err: io::Error) {
        self.error.get_or_insert(err);
        self.phase = Phase::ShuttingDown;
    }

    fn poll_relay<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<()>
    where
        R: AsyncRead + ?Sized,
        W: AsyncWrite + ?Sized,
    {
        loop {
            match self.phase {
                Phase::Done => return Poll::Ready(()),

                Phase::ShuttingDown => {
                    if let Err(e) = futures::ready!(writer.as_mut().poll_shutdown(cx)) {
                        // The peer may already be gone
                        trace!("Half-close failed: {}", e);
                    }
                    self.phase = Phase::Done;
                }

                Phase::Copying if self.pos < self.cap => {
                    match futures::ready!(
                        writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap])
                    ) {
                        Ok(0) => self.fail(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write zero bytes",
                        )),
                        Ok(n) => {
                            self.pos += n;
                            self.bytes += n as u64;
                            if self.pos == self.cap {
                                self.pos = 0;
                                self.cap = 0;
                            }
                        }
                        Err(e) => self.fail(e),
                    }
                }

                Phase::Copying => {
                    let mut read_buf = ReadBuf::new(&mut self.buf);
                    match futures::ready!(reader.as_mut().poll_read(cx, &mut read_buf)) {
                        Ok(()) => {
                            let n = read_buf.filled().len();
                            if n == 0 {
                                self.phase = Phase::ShuttingDown;
                            } else {
                                self.cap = n;
                            }
                        }
                        Err(e) => self.fail(e),
                    }
                }
            }
        }
    }
}

/// Future driving both directions of a relay
struct Relay<'a, C: ?Sized, B: ?Sized> {
    client: &'a mut C,
    backend: &'a mut B,
    client_to_backend: HalfRelay,
    backend_to_client: HalfRelay,
}

impl<C, B> Future for Relay<'_, C, B>
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    type Output = RelayResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        let upstream_done = this
            .client_to_backend
            .poll_relay(cx, Pin::new(&mut *this.client), Pin::new(&mut *this.backend))
            .is_ready();
        let downstream_done = this
            .backend_to_client
            .poll_relay(cx, Pin::new(&mut *this.backend), Pin::new(&mut *this.client))
            .is_ready();

        if !(upstream_done && downstream_done) {
            return Poll::Pending;
        }

        let upstream_err = this.client_to_backend.error.take();
        let downstream_err = this.backend_to_client.error.take();
        if let Some(e) = &upstream_err {
            debug!("client->backend ended with error: {}", e);
        }
        if let Some(e) = &downstream_err {
            debug!("backend->client ended with error: {}", e);
        }

        Poll::Ready(RelayResult {
            client_to_backend: this.client_to_backend.bytes,
            backend_to_client: this.backend_to_client.bytes,
            error: upstream_err.or(downstream_err),
        })
    }
}

/// Relay bytes between `client` and `backend` until both directions finish.
pub async fn relay<C, B>(client: &mut C, backend: &mut B) -> RelayResult
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    relay_with_buffer(client, backend, DEFAULT_BUFFER_SIZE).await
}

/// Same as [`relay`] with a custom per-direction buffer size.
pub async fn relay_with_buffer<C, B>(client: &mut C, backend: &mut B, buf_size: usize) -> RelayResult
where
    C: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    Relay {
        client,
        backend,
        client_to_backend: HalfRelay::new(buf_size.max(1)),
        backend_to_client: HalfRelay::new(buf_size.max(1)),
    }
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_relay_both_directions() {
        let (mut client_peer, mut client_end) = duplex(1024);
        let (mut backend_end, mut backend_peer) = duplex(1024);

        let relay_task =
            tokio::spawn(async move { relay(&mut client_end, &mut backend_end).await });

        client_peer.write_all(b"hello").await.unwrap();
        client_peer.shutdown().await.unwrap();

        let mut received = Vec::new();
        backend_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");

        backend_peer.write_all(b"world!").await.unwrap();
        backend_peer.shutdown().await.unwrap();

        let mut reply = Vec::new();
        client_peer.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, b"world!");

        let result = relay_task.await.unwrap();
        assert_eq!(result.client_to_backend, 5);
        assert_eq!(result.backend_to_client, 6);
        assert_eq!(result.total(), 11);
        assert!(result.is_clean());
    }

    #[tokio::test]
    async fn test_small_buffer_preserves_order() {
        let (mut client_peer, mut client_end) = duplex(16);
        let (mut backend_end, mut backend_peer) = duplex(16);

        let relay_task =
            tokio::spawn(async move { relay_with_buffer(&mut client_end, &mut backend_end, 3).await });

        let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client_peer.write_all(&payload).await.unwrap();
            client_peer.shutdown().await.unwrap();
            client_peer
        });

        let mut received = Vec::new();
        backend_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, expected);

        drop(backend_peer);
        drop(writer.await.unwrap());
        let result = relay_task.await.unwrap();
        assert_eq!(result.client_to_backend, 4096);
    }

    #[test]
    fn test_result_total() {
        let result = RelayResult {
            client_to_backend: 100,
            backend_to_client: 200,
            error: None,
        };
        assert_eq!(result.total(), 300);
        assert!(result.is_clean());
    }
}
