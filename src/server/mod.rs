//! HTTP server with cooperative shutdown.
//!
//! A [`Server`] serves any number of listeners concurrently. Each listener
//! gets an accept loop; each accepted connection gets a connection task; each
//! request gets its own handler task. [`Server::close`] stops everything:
//! accept loops exit, tracked listeners and connections are closed, and
//! in-flight handlers find their writes failing.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::latch::Latch;
use crate::transport::tls::load_server_config;
use crate::transport::{HttpConn, Listener, ResourceId, TcpListener, TlsListener, TransportError};

mod accept;
pub mod addr;
pub mod backoff;
mod connection;
pub mod handler;
pub mod request;
pub mod tracker;

pub use addr::ListenAddr;
pub use handler::{Handler, HandlerError, HandlerFuture};
pub use request::{NativeRequest, UpgradeOptions};
pub use tracker::{Resource, ResourceTracker};

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;

/// State shared by the facade, accept loops and connection tasks.
struct Shared {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    closed: Latch,
    listeners: ResourceTracker<dyn Resource>,
    connections: ResourceTracker<HttpConn>,
}

/// The HTTP server handle. Clones share the same server.
///
/// # Examples
///
/// ```rust,no_run
/// use native_http::{Response, Server, ServerConfig, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::new(ServerConfig::new("127.0.0.1:8080"), |_req, _info| async {
///         Ok(Response::new(StatusCode::OK).body("Hello!"))
///     });
///     server.close_on(async {
///         let _ = tokio::signal::ctrl_c().await;
///     });
///     server.start().await?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    /// Creates a server that answers every request with `handler`.
    pub fn new<H, F>(config: ServerConfig, handler: H) -> Self
    where
        H: Fn(Arc<NativeRequest>, crate::ConnInfo) -> F + Send + Sync + 'static,
        F: Future<Output = Result<crate::Response, HandlerError>> + Send + 'static,
    {
        Self::with_handler(config, handler)
    }

    /// Creates a server from any [`Handler`] implementation.
    pub fn with_handler(config: ServerConfig, handler: impl Handler) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler: Arc::new(handler),
                closed: Latch::new(),
                listeners: ResourceTracker::new(),
                connections: ResourceTracker::new(),
            }),
        }
    }

    /// Returns the configuration the server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_fired()
    }

    /// Local addresses of the listeners currently being served.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.shared
            .listeners
            .snapshot()
            .iter()
            .filter_map(|listener| listener.local_addr())
            .collect()
    }

    /// Number of connections currently open.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Serves `listener` until the server is closed.
    ///
    /// The listener is closed on every exit path.
    ///
    /// # Errors
    ///
    /// [`ServerError::ServerClosed`] if the server was already closed, or
    /// [`ServerError::Accept`] if accepting failed in a way backing off
    /// cannot fix.
    pub async fn serve<L: Listener>(&self, listener: L) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ServerClosed);
        }

        let entry = Arc::new(ListenerEntry {
            id: ResourceId::next(),
            listener,
        });
        if !self.shared.listeners.track(Arc::clone(&entry) as Arc<dyn Resource>) {
            let _ = entry.listener.close();
            return Err(ServerError::ServerClosed);
        }

        let address = entry.listener.local_addr().ok();
        info!(address = ?address, "listening");

        let result = self.shared.accept_loop(&entry.listener).await;

        self.shared.listeners.untrack(entry.id);
        if let Err(err) = entry.listener.close() {
            if !err.is_bad_resource() {
                warn!(address = ?address, error = %err, "failed to close listener");
            }
        }
        info!(address = ?address, "listener stopped");
        result
    }

    /// Binds the configured address over plain TCP and serves it.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        let listener = self.bind(DEFAULT_HTTP_PORT).await?;
        self.serve(listener).await
    }

    /// Binds the configured address, serves TLS with the given PEM files.
    pub async fn listen_and_serve_tls(
        &self,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        if self.is_closed() {
            return Err(ServerError::ServerClosed);
        }
        let tls = load_server_config(cert_path, key_path)?;
        let tcp = self.bind(DEFAULT_HTTPS_PORT).await?;
        let timeout = self.shared.config.http.tls_handshake_timeout();
        self.serve(TlsListener::new(tcp, tls, timeout)).await
    }

    /// Serves TLS when the config names certificate files, plain TCP
    /// otherwise.
    pub async fn start(&self) -> Result<(), ServerError> {
        match self.shared.config.tls.clone() {
            Some(tls) => self.listen_and_serve_tls(&tls.cert_path, &tls.key_path).await,
            None => self.listen_and_serve().await,
        }
    }

    async fn bind(&self, default_port: u16) -> Result<TcpListener, ServerError> {
        if self.is_closed() {
            return Err(ServerError::ServerClosed);
        }
        let addr = ListenAddr::parse(&self.shared.config.addr)?;
        let (host, port) = addr.bind_target(default_port);
        TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{port}", addr.host),
                source,
            })
    }

    /// Shuts the server down.
    ///
    /// Listener close failures other than "already closed" are logged and
    /// the first is returned once teardown is complete. Connection close
    /// failures are never reported.
    ///
    /// # Errors
    ///
    /// [`ServerError::ServerClosed`] if the server was already closed.
    pub fn close(&self) -> Result<(), ServerError> {
        if !self.shared.closed.fire() {
            return Err(ServerError::ServerClosed);
        }
        info!(
            listeners = self.shared.listeners.len(),
            connections = self.shared.connections.len(),
            "server closing"
        );

        let listener_failures = self.shared.listeners.close_all();
        for err in &listener_failures {
            warn!(error = %err, "failed to close listener");
        }
        for err in self.shared.connections.close_all() {
            debug!(error = %err, "failed to close connection");
        }

        match listener_failures.into_iter().next() {
            Some(err) => Err(ServerError::Transport(err)),
            None => Ok(()),
        }
    }

    /// Closes the server when `signal` resolves.
    pub fn close_on<S>(&self, signal: S) -> JoinHandle<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let server = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = signal => {
                    if let Err(err) = server.close() {
                        debug!(error = %err, "close on signal");
                    }
                }
                () = server.shared.closed.wait() => {}
            }
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.shared.config)
            .field("closed", &self.is_closed())
            .field("listeners", &self.shared.listeners.len())
            .field("connections", &self.shared.connections.len())
            .finish()
    }
}

/// A served listener as the tracker sees it.
struct ListenerEntry<L> {
    id: ResourceId,
    listener: L,
}

impl<L: Listener> Resource for ListenerEntry<L> {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn close(&self) -> Result<(), TransportError> {
        self.listener.close()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}
