//! Application handler abstraction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::NativeRequest;
use crate::error::BoxError;
use crate::http::Response;
use crate::transport::ConnInfo;

/// Error a handler returns to abandon a request. The connection that
/// carried the request is closed.
pub type HandlerError = BoxError;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, HandlerError>> + Send>>;

/// Produces a response for each request. Called concurrently from many
/// tasks.
///
/// Any `Fn(Arc<NativeRequest>, ConnInfo) -> impl Future<Output =
/// Result<Response, HandlerError>>` closure implements this.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Arc<NativeRequest>, conn_info: ConnInfo) -> HandlerFuture;
}

impl<T, F> Handler for T
where
    T: Fn(Arc<NativeRequest>, ConnInfo) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    fn call(&self, request: Arc<NativeRequest>, conn_info: ConnInfo) -> HandlerFuture {
        Box::pin(self(request, conn_info))
    }
}
