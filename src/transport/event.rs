//! A request pulled off a connection, together with the means to answer it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::{TransportError, Upgraded};
use crate::error::{BoxError, ServerError};
use crate::http::{Request, Response};

/// The eventual response to one request. An `Err` makes the connection
/// writer give up on the connection instead of writing anything.
pub type ResponseFuture = Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send>>;

/// One framed request and its response slot.
///
/// Responses are written in request order regardless of the order in which
/// their futures are registered or resolve.
pub struct RequestEvent {
    request: Request,
    settle: Option<oneshot::Sender<ResponseFuture>>,
    written: Option<oneshot::Receiver<Result<(), TransportError>>>,
    upgrade: Option<oneshot::Receiver<Upgraded>>,
}

impl RequestEvent {
    pub(crate) fn new(
        request: Request,
        settle: oneshot::Sender<ResponseFuture>,
        written: oneshot::Receiver<Result<(), TransportError>>,
        upgrade: Option<oneshot::Receiver<Upgraded>>,
    ) -> Self {
        Self {
            request,
            settle: Some(settle),
            written: Some(written),
            upgrade,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Registers the future that will produce the response.
    ///
    /// The returned [`ResponseWritten`] resolves once the response bytes have
    /// been flushed, or with an error if the connection went away first.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyResponded`] on a second call.
    pub fn respond_with<F>(&mut self, response: F) -> Result<ResponseWritten, ServerError>
    where
        F: Future<Output = Result<Response, BoxError>> + Send + 'static,
    {
        let (settle, written) = match (self.settle.take(), self.written.take()) {
            (Some(settle), Some(written)) => (settle, written),
            _ => return Err(ServerError::AlreadyResponded),
        };
        // A closed writer drops the receiver; `written` then reports it.
        let _ = settle.send(Box::pin(response));
        Ok(ResponseWritten(written))
    }

    /// Whether [`respond_with`](Self::respond_with) has been called.
    pub fn is_settled(&self) -> bool {
        self.settle.is_none()
    }

    /// Takes the upgrade capability. `None` unless the client asked to
    /// switch protocols, or if it was already taken.
    pub fn take_upgrade(&mut self) -> Option<UpgradeHandle> {
        self.upgrade.take().map(UpgradeHandle)
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("request", &self.request)
            .field("settled", &self.is_settled())
            .field("upgradable", &self.upgrade.is_some())
            .finish()
    }
}

/// Resolves once the response has been written to the socket.
#[derive(Debug)]
#[must_use = "the write outcome is only observable by awaiting"]
pub struct ResponseWritten(oneshot::Receiver<Result<(), TransportError>>);

impl Future for ResponseWritten {
    type Output = Result<(), TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(TransportError::bad_resource("connection closed before the response was written"))
            })
        })
    }
}

/// Resolves to the raw stream once a `101` response has been written.
#[derive(Debug)]
pub struct UpgradeHandle(oneshot::Receiver<Upgraded>);

impl Future for UpgradeHandle {
    type Output = Result<Upgraded, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|outcome| {
            outcome.map_err(|_| TransportError::bad_resource("connection closed before the upgrade"))
        })
    }
}
