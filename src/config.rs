//! Server configuration, loadable from TOML.
//!
//! Every field has a default, so an empty document is a valid config:
//!
//! ```toml
//! addr = "127.0.0.1:8080"
//!
//! [tls]
//! cert_path = "certs/server.crt"
//! key_path = "certs/server.key"
//!
//! [backoff]
//! initial_ms = 5
//! max_ms = 1000
//!
//! [http]
//! max_request_size = 8388608
//! max_in_flight_requests = 32
//! tls_handshake_timeout_secs = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading a [`ServerConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host[:port]` or `:port`. Without a port, 80 is used for plain HTTP
    /// and 443 for TLS.
    pub addr: String,
    /// When set, [`Server::start`](crate::Server::start) serves TLS.
    pub tls: Option<TlsConfig>,
    pub backoff: BackoffConfig,
    pub http: HttpConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0".to_owned(),
            tls: None,
            backoff: BackoffConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default config listening on `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = BackoffConfig {
            initial_ms: duration_ms(initial),
            max_ms: duration_ms(max),
        };
        self
    }

    #[must_use]
    pub fn with_max_in_flight_requests(mut self, requests: usize) -> Self {
        self.http.max_in_flight_requests = requests;
        self
    }

    #[must_use]
    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.http.max_request_size = bytes;
        self
    }

    /// Parses a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Accept-loop retry delays after transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 5,
            max_ms: 1000,
        }
    }
}

impl BackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Largest request (head plus body) buffered before answering 413.
    pub max_request_size: usize,
    /// Requests per connection that may be framed before their responses
    /// are written. The connection stops reading at this limit.
    pub max_in_flight_requests: usize,
    pub tls_handshake_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_request_size: 8 * 1024 * 1024,
            max_in_flight_requests: 32,
            tls_handshake_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    /// In-flight limit, never below one.
    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight_requests.max(1)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.tls_handshake_timeout_secs)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
