//! HTTP/1.1 request framing using the [`httparse`] crate.

use std::io::Cursor;

use bytes::Bytes;
use thiserror::Error;
use url::{Position, Url};

use super::{Headers, Method};

/// Errors that can occur while framing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid Content-Length header")]
    InvalidContentLength,

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("Transfer-Encoding request bodies are not supported")]
    UnsupportedTransferEncoding,
}

/// A fully framed HTTP/1.1 request.
///
/// The transport builds these with [`Request::parse`] and then resolves the
/// absolute URL from the connection scheme and `Host` header, so
/// [`url`](Self::url) is `http://example.com/a?b` even though the wire only
/// carried `/a?b`.
///
/// # Examples
///
/// ```
/// use native_http::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, consumed) = Request::parse(raw, 1024).unwrap();
///
/// assert_eq!(consumed, raw.len());
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.target(), "/hello?name=world");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    target: String,
    url: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates a request directly, bypassing the wire parser. `url` is
    /// stored as both the request target and the absolute URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            method,
            target: url.clone(),
            url,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Frames one request from the front of `buf`.
    ///
    /// Returns the request and the number of bytes it occupied (head plus
    /// body). Anything after that belongs to the next pipelined request.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: the head or the body is not fully buffered yet.
    /// - [`RequestError::BodyTooLarge`]: head plus `Content-Length` exceeds `max_size`.
    /// - [`RequestError::UnsupportedTransferEncoding`]: the body is chunked or otherwise encoded.
    /// - any other variant: the bytes are malformed.
    pub fn parse(buf: &[u8], max_size: usize) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let head_len = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => m.parse().unwrap_or_else(|never| match never {}),
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        if header_map.contains("transfer-encoding") {
            return Err(RequestError::UnsupportedTransferEncoding);
        }

        let content_length = match header_map.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength)?,
            None => 0,
        };
        let total = head_len.saturating_add(content_length);
        if total > max_size {
            return Err(RequestError::BodyTooLarge { max_bytes: max_size });
        }

        if buf.len() < total {
            return Err(RequestError::Incomplete);
        }

        Ok((
            Self {
                method,
                url: target.clone(),
                target,
                version,
                headers: header_map,
                body: Bytes::copy_from_slice(&buf[head_len..total]),
            },
            total,
        ))
    }

    /// Rebuilds the absolute URL for origin-form targets (`/path?q`).
    ///
    /// The authority comes from the `Host` header when it is a bare
    /// `host[:port]`, and from `fallback_authority` otherwise, so the path
    /// and query always come from the request line. Absolute-form,
    /// authority-form and `*` targets are left as they are.
    pub(crate) fn resolve_url(&mut self, scheme: &str, fallback_authority: &str) {
        if !self.target.starts_with('/') {
            return;
        }
        let authority = self
            .headers
            .get("host")
            .and_then(|host| bare_authority(scheme, host.trim()))
            .unwrap_or_else(|| fallback_authority.to_owned());
        self.url = format!("{scheme}://{authority}{}", self.target);
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as it appeared on the request line.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The absolute request URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The target path without the query string.
    pub fn path(&self) -> &str {
        match self.target.find('?') {
            Some(pos) => &self.target[..pos],
            None => &self.target,
        }
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The body as an [`AsyncRead`](tokio::io::AsyncRead) byte stream.
    ///
    /// Each call starts a fresh reader over the same shared buffer.
    pub fn body_reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is sent.
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive` is sent.
    pub fn is_keep_alive(&self) -> bool {
        if self.version == 1 {
            !self.headers.has_token("connection", "close")
        } else {
            self.headers.has_token("connection", "keep-alive")
        }
    }

    /// Returns `true` if the client asked to switch protocols on this
    /// connection (`Connection: upgrade` plus an `Upgrade` header).
    pub fn wants_upgrade(&self) -> bool {
        self.headers.contains("upgrade") && self.headers.has_token("connection", "upgrade")
    }
}

/// Normalized `host[:port]`, or `None` if `host` carries credentials, a
/// path, a query or a fragment.
fn bare_authority(scheme: &str, host: &str) -> Option<String> {
    if host.is_empty() {
        return None;
    }
    let url = Url::parse(&format!("{scheme}://{host}")).ok()?;
    let bare = url.host_str().is_some_and(|h| !h.is_empty())
        && url.username().is_empty()
        && url.password().is_none()
        && matches!(url.path(), "" | "/")
        && url.query().is_none()
        && url.fragment().is_none();
    bare.then(|| url[Position::BeforeHost..Position::AfterPort].to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, consumed) = Request::parse(raw, MAX).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.target(), "/");
        assert_eq!(req.version(), 1);
        assert_eq!(consumed, raw.len());
        assert!(req.body().is_empty());
    }

    #[test]
    fn body_stops_at_content_length() {
        let raw = b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\n\r\n";
        let (req, consumed) = Request::parse(raw, MAX).unwrap();
        assert_eq!(&req.body()[..], b"hello");
        let (next, _) = Request::parse(&raw[consumed..], MAX).unwrap();
        assert_eq!(next.target(), "/b");
    }

    #[test]
    fn partial_body_is_incomplete() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nhel";
        assert!(matches!(Request::parse(raw, MAX), Err(RequestError::Incomplete)));
    }

    #[test]
    fn partial_head_is_incomplete() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw, MAX), Err(RequestError::Incomplete)));
    }

    #[test]
    fn oversized_body_is_rejected_before_buffering() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
        assert!(matches!(
            Request::parse(raw, MAX),
            Err(RequestError::BodyTooLarge { max_bytes: MAX })
        ));
    }

    #[test]
    fn chunked_bodies_are_refused() {
        let raw = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(
            Request::parse(raw, MAX),
            Err(RequestError::UnsupportedTransferEncoding)
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let raw = b"\x01\x02 nonsense\r\n\r\n";
        assert!(matches!(Request::parse(raw, MAX), Err(RequestError::Parse(_))));
    }

    #[test]
    fn resolves_origin_form_against_host() {
        let raw = b"GET /a?b=1 HTTP/1.1\r\nHost: example.com:8080\r\n\r\n";
        let (mut req, _) = Request::parse(raw, MAX).unwrap();
        req.resolve_url("https", "127.0.0.1:443");
        assert_eq!(req.url(), "https://example.com:8080/a?b=1");
    }

    #[test]
    fn resolves_against_fallback_without_host() {
        let raw = b"GET /x HTTP/1.0\r\n\r\n";
        let (mut req, _) = Request::parse(raw, MAX).unwrap();
        req.resolve_url("http", "127.0.0.1:8000");
        assert_eq!(req.url(), "http://127.0.0.1:8000/x");
    }

    #[test]
    fn host_cannot_rewrite_the_target() {
        for host in ["x/admin?", "x?q=1", "x#frag", "user@x", "x\\admin", "  "] {
            let raw = format!("GET /public HTTP/1.1\r\nHost: {host}\r\n\r\n");
            let (mut req, _) = Request::parse(raw.as_bytes(), MAX).unwrap();
            req.resolve_url("http", "127.0.0.1:8000");
            assert_eq!(req.url(), "http://127.0.0.1:8000/public", "Host: {host:?}");
        }
    }

    #[test]
    fn host_authority_is_normalized() {
        let raw = b"GET /p HTTP/1.1\r\nHost: Example.COM:80\r\n\r\n";
        let (mut req, _) = Request::parse(raw, MAX).unwrap();
        req.resolve_url("http", "127.0.0.1:8000");
        assert_eq!(req.url(), "http://example.com/p");
    }

    #[test]
    fn keep_alive_rules() {
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n", MAX).unwrap();
        assert!(req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n", MAX).unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) = Request::parse(b"GET / HTTP/1.0\r\n\r\n", MAX).unwrap();
        assert!(!req.is_keep_alive());
        let (req, _) =
            Request::parse(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n", MAX).unwrap();
        assert!(req.is_keep_alive());
    }

    #[test]
    fn upgrade_needs_both_headers() {
        let raw = b"GET / HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n";
        let (req, _) = Request::parse(raw, MAX).unwrap();
        assert!(req.wants_upgrade());
        let (req, _) = Request::parse(b"GET / HTTP/1.1\r\nUpgrade: echo\r\n\r\n", MAX).unwrap();
        assert!(!req.wants_upgrade());
    }
}
