//! Correlates one inbound request with its eventual response.

use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;
use url::{Position, Url};

use crate::error::{BoxError, ServerError};
use crate::http::{Headers, Method, Request, Response, StatusCode};
use crate::transport::{
    ConnInfo, RequestEvent, ResponseWritten, TransportError, UpgradeHandle, Upgraded,
};

/// Options for switching a request's connection to another protocol.
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    pub protocol: String,
    /// Extra headers for the `101` response.
    pub headers: Headers,
}

impl UpgradeOptions {
    /// Switches to `protocol`, sent back in the `Upgrade` header.
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            headers: Headers::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(StatusCode::SWITCHING_PROTOCOLS)
            .header("Connection", "Upgrade")
            .header("Upgrade", self.protocol);
        for (name, value) in self.headers.iter() {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

struct Slot {
    responder: Option<oneshot::Sender<Result<Response, BoxError>>>,
    written: Option<ResponseWritten>,
    upgrade: Option<UpgradeHandle>,
}

/// A request handed to the application, settled exactly once through
/// [`respond`](Self::respond), [`error`](Self::error) or
/// [`upgrade`](Self::upgrade).
///
/// The response slot is registered with the transport as soon as the
/// request is constructed, so the connection writer can queue it behind
/// earlier requests before the handler has produced anything.
pub struct NativeRequest {
    request: Request,
    url: String,
    conn_info: ConnInfo,
    upgradable: bool,
    resolved: AtomicBool,
    slot: Mutex<Slot>,
}

impl NativeRequest {
    /// # Errors
    ///
    /// [`ServerError::AlreadyResponded`] if `event` was already settled.
    pub fn new(mut event: RequestEvent, conn_info: ConnInfo) -> Result<Self, ServerError> {
        let (responder, response) = oneshot::channel::<Result<Response, BoxError>>();
        let written = event.respond_with(async move {
            response
                .await
                .unwrap_or_else(|_| Err("request dropped before it was answered".into()))
        })?;
        let upgrade = event.take_upgrade();
        let request = event.into_request();

        Ok(Self {
            url: strip_origin(request.url()),
            request,
            conn_info,
            upgradable: upgrade.is_some(),
            resolved: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                responder: Some(responder),
                written: Some(written),
                upgrade,
            }),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the request and hands `outcome` to the connection writer.
    fn settle(&self, slot: &mut Slot, outcome: Result<Response, BoxError>) -> Result<ResponseWritten, ServerError> {
        let (Some(responder), Some(written)) = (slot.responder.take(), slot.written.take()) else {
            return Err(ServerError::AlreadyResponded);
        };
        self.resolved.store(true, Ordering::Release);
        // If the writer is gone, `written` reports the closed connection.
        let _ = responder.send(outcome);
        Ok(written)
    }

    /// Sends `response`. Await the returned future to learn whether it
    /// reached the socket.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyResponded`] if the request was already settled.
    pub fn respond(&self, response: Response) -> Result<ResponseWritten, ServerError> {
        let mut slot = self.slot();
        self.settle(&mut slot, Ok(response))
    }

    /// Abandons the request; the transport closes its connection instead of
    /// writing a response.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyResponded`] if the request was already settled.
    pub fn error(&self, reason: impl Into<BoxError>) -> Result<(), ServerError> {
        let mut slot = self.slot();
        self.settle(&mut slot, Err(reason.into())).map(drop)
    }

    /// Answers with `101 Switching Protocols` and returns a future resolving
    /// to the raw stream once that response is on the wire.
    ///
    /// # Errors
    ///
    /// [`ServerError::UpgradeUnsupported`] if the client did not ask to
    /// upgrade; [`ServerError::AlreadyResponded`] if the request was
    /// already settled.
    pub fn upgrade(
        &self,
        options: UpgradeOptions,
    ) -> Result<impl Future<Output = Result<Upgraded, TransportError>> + Send + use<>, ServerError>
    {
        if !self.upgradable {
            return Err(ServerError::UpgradeUnsupported);
        }
        let mut slot = self.slot();
        let handle = match slot.upgrade.take() {
            Some(handle) if slot.responder.is_some() => handle,
            _ => return Err(ServerError::AlreadyResponded),
        };
        let written = self.settle(&mut slot, Ok(options.into_response()))?;

        Ok(async move {
            written.await?;
            handle.await
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn headers(&self) -> &Headers {
        self.request.headers()
    }

    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    pub fn body_reader(&self) -> Cursor<Bytes> {
        self.request.body_reader()
    }

    /// Path, query and fragment, without scheme and authority.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The absolute URL as the transport reported it.
    pub fn raw_url(&self) -> &str {
        self.request.url()
    }

    pub fn conn_info(&self) -> ConnInfo {
        self.conn_info
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}

impl std::fmt::Debug for NativeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRequest")
            .field("method", self.method())
            .field("url", &self.url)
            .field("conn_info", &self.conn_info)
            .field("resolved", &self.is_resolved())
            .finish_non_exhaustive()
    }
}

fn strip_origin(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) if url.has_host() => url[Position::BeforePath..].to_owned(),
        _ => raw.to_owned(),
    }
}
