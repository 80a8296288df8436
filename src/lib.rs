//! # native-http
//!
//! An async HTTP/1.1 connection-serving engine.
//!
//! The [`Server`] accepts connections from any number of [`Listener`]s,
//! frames pipelined requests off each connection, hands every request to the
//! application [`Handler`] on its own task, and writes responses back in
//! request order. Transient accept failures are retried with exponential
//! backoff, and [`Server::close`] tears down every listener and connection
//! exactly once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use native_http::{Response, Server, ServerConfig, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::new(":8080"), |req, info| async move {
//!         let body = format!("{} {} from {}", req.method(), req.url(), info.remote_addr);
//!         Ok(Response::new(StatusCode::OK).body(body))
//!     });
//!     server.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! [`Listener`]: transport::Listener

pub mod config;
pub mod error;
pub mod http;
mod latch;
pub mod server;
pub mod transport;

pub use config::{BackoffConfig, ConfigError, HttpConfig, ServerConfig, TlsConfig};
pub use error::{BoxError, ServerError, TransportError, TransportErrorKind};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Handler, HandlerError, NativeRequest, Server, UpgradeOptions};
pub use transport::{ConnInfo, Upgraded};
