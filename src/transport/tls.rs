//! TLS listener on top of [`TcpListener`], using rustls through `tokio-rustls`.

use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::{Accept, TlsAcceptor};
use tokio_rustls::rustls;
use tokio_rustls::server::TlsStream;
use tracing::debug;

use super::{Connection, Incoming, Listener, TcpListener, TransportError, TransportErrorKind};

/// Errors raised while loading certificates or building the rustls config.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificates found in {}", .0.display())]
    NoCertificates(PathBuf),

    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Builds a rustls server config from a PEM certificate chain and key.
pub fn load_server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();
    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| TlsError::Read { path, source }
    };

    let mut reader = BufReader::new(File::open(cert_path).map_err(read_err(cert_path))?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut reader = BufReader::new(File::open(key_path).map_err(read_err(key_path))?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

impl Connection for TlsStream<TcpStream> {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.local_addr()
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.peer_addr()
    }

    fn scheme(&self) -> &'static str {
        "https"
    }
}

/// Accepts TCP connections and hands them out as pending TLS handshakes.
///
/// The handshake runs when the server establishes the connection on its own
/// task, so a client that never sends a ClientHello only ties up itself.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsListener {
    /// Wraps `tcp`; handshakes that take longer than `handshake_timeout`
    /// are abandoned.
    pub fn new(tcp: TcpListener, config: Arc<rustls::ServerConfig>, handshake_timeout: Duration) -> Self {
        Self {
            tcp,
            acceptor: TlsAcceptor::from(config),
            handshake_timeout,
        }
    }
}

impl Listener for TlsListener {
    type Conn = TlsHandshake;

    async fn accept(&self) -> Result<TlsHandshake, TransportError> {
        let (stream, peer) = self.tcp.accept_stream().await?;
        Ok(TlsHandshake {
            handshake: self.acceptor.accept(stream),
            peer,
            timeout: self.handshake_timeout,
        })
    }

    fn close(&self) -> Result<(), TransportError> {
        self.tcp.close()
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.tcp.local_addr()
    }
}

/// A TCP connection whose TLS handshake has not run yet.
///
/// A failed or timed-out handshake is reported as
/// [`TransportErrorKind::InvalidData`]; only this connection is lost.
pub struct TlsHandshake {
    handshake: Accept<TcpStream>,
    peer: SocketAddr,
    timeout: Duration,
}

impl TlsHandshake {
    /// Address of the client being handshaken with.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Incoming for TlsHandshake {
    type Conn = TlsStream<TcpStream>;

    async fn establish(self) -> Result<TlsStream<TcpStream>, TransportError> {
        let peer = self.peer;
        match tokio::time::timeout(self.timeout, self.handshake).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(err)) => {
                debug!(peer = %peer, error = %err, "TLS handshake failed");
                Err(TransportError::new(TransportErrorKind::InvalidData, err))
            }
            Err(_) => {
                debug!(peer = %peer, "TLS handshake timed out");
                Err(TransportError::new(
                    TransportErrorKind::InvalidData,
                    io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
                ))
            }
        }
    }
}
