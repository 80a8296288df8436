//! Error types shared by the transport and the server.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::tls::TlsError;

/// A type-erased error, used for handler failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a transport failure.
///
/// The accept loop retries the first five kinds with backoff; anything
/// classified as [`Other`](Self::Other) is fatal for the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The resource was already closed, usually by a concurrent shutdown.
    BadResource,
    /// Malformed bytes, e.g. a broken TLS handshake.
    InvalidData,
    /// The peer went away in the middle of an exchange.
    UnexpectedEof,
    /// The peer reset or aborted the connection.
    ConnectionReset,
    /// The socket is no longer connected.
    NotConnected,
    /// Anything else. Fatal for the accept loop.
    Other,
}

impl TransportErrorKind {
    /// Returns `true` for kinds the accept loop retries with backoff.
    pub fn is_transient(self) -> bool {
        match self {
            Self::BadResource
            | Self::InvalidData
            | Self::UnexpectedEof
            | Self::ConnectionReset
            | Self::NotConnected => true,
            Self::Other => false,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::BadResource => "bad resource",
            Self::InvalidData => "invalid data",
            Self::UnexpectedEof => "unexpected end of stream",
            Self::ConnectionReset => "connection reset",
            Self::NotConnected => "not connected",
            Self::Other => "transport failure",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<io::ErrorKind> for TransportErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::InvalidData => Self::InvalidData,
            io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::NotConnected => Self::NotConnected,
            _ => Self::Other,
        }
    }
}

/// A failure reported by a listener or connection.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: io::Error,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: io::Error) -> Self {
        Self { kind, source }
    }

    /// The resource is already closed.
    pub fn bad_resource(message: &'static str) -> Self {
        Self::new(
            TransportErrorKind::BadResource,
            io::Error::new(io::ErrorKind::NotConnected, message),
        )
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_bad_resource(&self) -> bool {
        self.kind == TransportErrorKind::BadResource
    }
}

impl From<io::Error> for TransportError {
    fn from(source: io::Error) -> Self {
        Self::new(source.kind().into(), source)
    }
}

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server closed")]
    ServerClosed,

    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("request has already been responded to")]
    AlreadyResponded,

    #[error("the transport does not support upgrading this request")]
    UpgradeUnsupported,

    #[error("failed to accept connection: {0}")]
    Accept(#[source] TransportError),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_onto_transient_tags() {
        for kind in [
            io::ErrorKind::InvalidData,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
        ] {
            assert!(TransportError::from(io::Error::from(kind)).is_transient(), "{kind:?}");
        }
    }

    #[test]
    fn unclassified_io_errors_are_fatal() {
        let err = TransportError::from(io::Error::other("too many open files"));
        assert_eq!(err.kind(), TransportErrorKind::Other);
        assert!(!err.is_transient());
    }

    #[test]
    fn bad_resource_is_transient() {
        let err = TransportError::bad_resource("listener closed");
        assert!(err.is_bad_resource());
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "bad resource: listener closed");
    }
}
