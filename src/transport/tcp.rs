//! Closeable TCP listener.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

use super::{Listener, TransportError};
use crate::latch::Latch;

/// A [`tokio::net::TcpListener`] that can be closed while another task is
/// blocked in [`accept`](Listener::accept).
#[derive(Debug)]
pub struct TcpListener {
    inner: Mutex<Option<Arc<tokio::net::TcpListener>>>,
    local_addr: SocketAddr,
    closed: Latch,
}

impl TcpListener {
    pub async fn bind(addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        Self::from_tokio(tokio::net::TcpListener::bind(addr).await?)
    }

    pub fn from_tokio(listener: tokio::net::TcpListener) -> std::io::Result<Self> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            inner: Mutex::new(Some(Arc::new(listener))),
            local_addr,
            closed: Latch::new(),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<tokio::net::TcpListener>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts one stream, or fails with `BadResource` once closed.
    pub(crate) async fn accept_stream(&self) -> Result<(TcpStream, SocketAddr), TransportError> {
        let listener = self
            .slot()
            .clone()
            .ok_or_else(|| TransportError::bad_resource("listener closed"))?;

        let (stream, peer) = tokio::select! {
            biased;
            () = self.closed.wait() => return Err(TransportError::bad_resource("listener closed")),
            accepted = listener.accept() => accepted?,
        };
        if let Err(err) = stream.set_nodelay(true) {
            trace!(peer = %peer, error = %err, "failed to set TCP_NODELAY");
        }
        Ok((stream, peer))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    pub(crate) async fn wait_closed(&self) {
        self.closed.wait().await;
    }
}

impl Listener for TcpListener {
    type Conn = TcpStream;

    async fn accept(&self) -> Result<TcpStream, TransportError> {
        let (stream, _) = self.accept_stream().await?;
        Ok(stream)
    }

    fn close(&self) -> Result<(), TransportError> {
        if !self.closed.fire() {
            return Err(TransportError::bad_resource("listener already closed"));
        }
        // Dropping the last handle releases the socket once in-flight
        // accepts have observed the latch.
        self.slot().take();
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        if self.is_closed() {
            return Err(TransportError::bad_resource("listener closed"));
        }
        Ok(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::TransportErrorKind;

    #[tokio::test]
    async fn close_unblocks_pending_accept() {
        let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await.unwrap());
        let accepting = {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener.accept().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        listener.close().unwrap();

        let err = accepting.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::BadResource);
    }

    #[tokio::test]
    async fn second_close_is_bad_resource() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.close().unwrap();
        assert!(listener.close().unwrap_err().is_bad_resource());
        assert!(listener.accept().await.unwrap_err().is_bad_resource());
    }

    #[tokio::test]
    async fn accepts_loopback_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let server_side = listener.accept().await.unwrap();
        let client_side = client.await.unwrap();
        assert_eq!(server_side.peer_addr().unwrap(), client_side.local_addr().unwrap());
    }
}
