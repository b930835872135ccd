//! Stream wrapper that reports traffic to a [`TrafficObserver`].

use super::peers::TrafficObserver;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};

/// Counts bytes read from and written to a peer connection.
pub struct CountingStream<S> {
    inner: S,
    peer: String,
    observer: Arc<dyn TrafficObserver>,
}

impl<S> CountingStream<S> {
    /// Wrap `inner`, attributing its traffic to `peer`.
    pub fn new(inner: S, peer: impl Into<String>, observer: Arc<dyn TrafficObserver>) -> Self {
        Self {
            inner,
            peer: peer.into(),
            observer,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CountingStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = result {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.observer.bytes_received(&this.peer, read as u64);
            }
        }
        result
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CountingStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = result
            && written > 0
        {
            this.observer.bytes_sent(&this.peer, written as u64);
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::PeerStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_counts_both_directions() {
        let stats = Arc::new(PeerStats::new());
        let (client, mut server) = io::duplex(64);
        let mut counted = CountingStream::new(client, "192.0.2.7", stats.clone());

        server.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        counted.read_exact(&mut buf).await.unwrap();

        counted.write_all(b"ok").await.unwrap();
        let mut reply = [0u8; 2];
        server.read_exact(&mut reply).await.unwrap();

        let peer = stats.get("192.0.2.7").unwrap();
        assert_eq!(peer.bytes_up, 7);
        assert_eq!(peer.bytes_dn, 2);
    }

    #[tokio::test]
    async fn test_eof_is_not_counted() {
        let stats = Arc::new(PeerStats::new());
        let (client, server) = io::duplex(64);
        drop(server);
        let mut counted = CountingStream::new(client, "192.0.2.8", stats.clone());

        let mut buf = [0u8; 4];
        assert_eq!(counted.read(&mut buf).await.unwrap(), 0);
        assert!(stats.get("192.0.2.8").is_none());
    }
}
