//! Listener and connection plumbing beneath the server.
//!
//! A [`Listener`] hands out raw byte-stream [`Connection`]s. The server
//! upgrades each one into an [`HttpConn`], which frames pipelined HTTP/1.1
//! requests off the read side and writes responses back in request order.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub mod conn;
pub mod event;
pub mod tcp;
pub mod tls;
pub mod upgrade;

pub use conn::HttpConn;
pub use event::{RequestEvent, ResponseFuture, ResponseWritten, UpgradeHandle};
pub use tcp::TcpListener;
pub use tls::{TlsError, TlsHandshake, TlsListener};
pub use upgrade::Upgraded;

pub use crate::error::{TransportError, TransportErrorKind};

/// Any owned, bidirectional async byte stream.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A freshly accepted byte stream, before HTTP framing.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn remote_addr(&self) -> io::Result<SocketAddr>;

    /// URL scheme for requests arriving on this connection.
    fn scheme(&self) -> &'static str {
        "http"
    }
}

impl Connection for TcpStream {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.peer_addr()
    }
}

/// An accepted stream that may still need a handshake before it carries
/// HTTP bytes.
///
/// The server establishes each one on its own task, so a slow peer never
/// holds up the accept loop. Every [`Connection`] is already established.
pub trait Incoming: Send + 'static {
    type Conn: Connection;

    fn establish(self) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;
}

impl<C: Connection> Incoming for C {
    type Conn = C;

    async fn establish(self) -> Result<C, TransportError> {
        Ok(self)
    }
}

/// A source of connections that can be closed from another task.
///
/// Closing must unblock a pending [`accept`](Self::accept) with a
/// [`TransportErrorKind::BadResource`] error, and a second close must fail
/// the same way.
pub trait Listener: Send + Sync + 'static {
    /// What `accept` yields: a ready connection, or a pending handshake.
    type Conn: Incoming;

    fn accept(&self) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;

    fn close(&self) -> Result<(), TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// Lets a caller keep a handle to a listener it hands to the server.
impl<L: Listener> Listener for Arc<L> {
    type Conn = L::Conn;

    fn accept(&self) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send {
        L::accept(self)
    }

    fn close(&self) -> Result<(), TransportError> {
        L::close(self)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        L::local_addr(self)
    }
}

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a listener or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses of the two ends of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnInfo {
    pub local_addr: SocketAddr,
    pub remote_addr: SocketAddr,
}
