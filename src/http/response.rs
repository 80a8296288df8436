//! HTTP/1.1 response builder.
//!
//! Handlers build a [`Response`] with the fluent API; the connection writer
//! serializes it once it knows whether the connection stays open.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use native_http::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(&response.body_bytes()[..], br#"{"status":"ok"}"#);
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    ///
    /// The `Content-Length` header is written automatically on serialization.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Asks the connection to close once this response has been written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Whether the handler allowed the connection to stay open.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive && !self.headers.has_token("connection", "close")
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// `keep_alive` is the connection's final decision and sets the
    /// `Connection` header, except on `101 Switching Protocols` where the
    /// handler's own `Connection: upgrade` is preserved. `include_body` is
    /// `false` for responses to `HEAD`. Statuses that cannot carry a body get
    /// neither a body nor a `Content-Length`.
    pub(crate) fn encode(mut self, keep_alive: bool, include_body: bool) -> BytesMut {
        let framed = self.status.allows_body();
        let content_length = self.body.len();

        if self.status != StatusCode::SWITCHING_PROTOCOLS {
            self.headers
                .set("Connection", if keep_alive { "keep-alive" } else { "close" });
        }
        if framed && !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.remove("content-length");

        let estimated_size = 128 + self.headers.len() * 64 + content_length;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        if framed {
            buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        }

        buf.put(&b"\r\n"[..]);

        if framed && include_body {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(response: Response, keep_alive: bool, include_body: bool) -> String {
        String::from_utf8(response.encode(keep_alive, include_body).to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let s = encoded(Response::new(StatusCode::OK).body("Hello"), true, true);
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn head_response_keeps_length_but_drops_body() {
        let s = encoded(Response::new(StatusCode::OK).body("Hello"), true, false);
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\n"));
    }

    #[test]
    fn connection_decision_overrides_handler_header() {
        let r = Response::new(StatusCode::OK).header("Connection", "keep-alive");
        let s = encoded(r, false, true);
        assert!(s.contains("Connection: close\r\n"));
        assert!(!s.contains("keep-alive"));
    }

    #[test]
    fn switching_protocols_has_no_length() {
        let r = Response::new(StatusCode::SWITCHING_PROTOCOLS)
            .header("Connection", "Upgrade")
            .header("Upgrade", "echo");
        let s = encoded(r, true, true);
        assert!(s.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(s.contains("Connection: Upgrade\r\n"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn no_content_has_no_length() {
        let s = encoded(Response::new(StatusCode::NO_CONTENT), true, true);
        assert!(!s.contains("Content-Type"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn handler_close_header_disables_keep_alive() {
        assert!(Response::new(StatusCode::OK).is_keep_alive());
        assert!(!Response::new(StatusCode::OK).keep_alive(false).is_keep_alive());
        let r = Response::new(StatusCode::OK).header("Connection", "close");
        assert!(!r.is_keep_alive());
    }
}
