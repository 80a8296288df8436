//! Parsing of the configured listen address.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::ServerError;

/// A validated `host[:port]` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr {
    /// Hostname or IP literal. IPv6 literals keep their brackets.
    pub host: String,
    pub port: Option<u16>,
}

impl ListenAddr {
    /// Parses `host[:port]` or `:port` (shorthand for `0.0.0.0:port`).
    ///
    /// # Errors
    ///
    /// [`ServerError::InvalidAddress`] if the address is not a bare
    /// authority, e.g. it carries credentials, a path, a query or a fragment.
    pub fn parse(addr: &str) -> Result<Self, ServerError> {
        let invalid = |reason: &str| ServerError::InvalidAddress {
            addr: addr.to_owned(),
            reason: reason.to_owned(),
        };

        let normalized = match addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => addr.to_owned(),
        };
        // A scheme without a registered default port keeps an explicit
        // `:80` or `:443` instead of eliding it.
        let url = Url::parse(&format!("tcp://{normalized}"))
            .map_err(|err| invalid(&err.to_string()))?;

        if !url.username().is_empty() || url.password().is_some() {
            return Err(invalid("credentials are not allowed"));
        }
        if !matches!(url.path(), "" | "/") {
            return Err(invalid("a path is not allowed"));
        }
        if url.query().is_some() {
            return Err(invalid("a query is not allowed"));
        }
        if url.fragment().is_some() {
            return Err(invalid("a fragment is not allowed"));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?;

        Ok(Self {
            host: host.to_owned(),
            port: url.port(),
        })
    }

    /// Returns the explicit port, or `default` if none was given.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Host and port in the form socket address resolution expects.
    pub fn bind_target(&self, default_port: u16) -> (String, u16) {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(&self.host);
        (host.to_owned(), self.port_or(default_port))
    }
}

impl FromStr for ListenAddr {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{port}", self.host),
            None => f.write_str(&self.host),
        }
    }
}
