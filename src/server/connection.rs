//! Per-connection serving: pull requests, dispatch handlers, close on exit.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{NativeRequest, Shared};
use crate::error::ServerError;
use crate::transport::HttpConn;

impl Shared {
    /// Delivers every request on `conn` to the handler, each on its own
    /// task, until the connection ends or the server closes.
    pub(super) async fn serve_connection(self: Arc<Self>, conn: Arc<HttpConn>) {
        let info = conn.info();
        debug!(conn = %conn.id(), peer = %info.remote_addr, "serving connection");

        while !self.closed.is_fired() {
            let event = match conn.next_request().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    debug!(conn = %conn.id(), peer = %info.remote_addr, error = %err, "read failed");
                    break;
                }
            };

            let request = match NativeRequest::new(event, info) {
                Ok(request) => Arc::new(request),
                Err(err) => {
                    warn!(conn = %conn.id(), error = %err, "could not register response");
                    break;
                }
            };

            let shared = Arc::clone(&self);
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { shared.dispatch(request, conn).await });
        }

        self.release(&conn);
        debug!(conn = %conn.id(), peer = %info.remote_addr, "connection finished");
    }

    async fn dispatch(&self, request: Arc<NativeRequest>, conn: Arc<HttpConn>) {
        debug!(
            conn = %conn.id(),
            method = %request.method(),
            url = request.url(),
            "dispatching request"
        );

        let failure = match self.handler.call(Arc::clone(&request), request.conn_info()).await {
            Ok(_) if request.is_resolved() => return,
            Ok(response) => match request.respond(response) {
                Ok(written) => match written.await {
                    Ok(()) => return,
                    Err(err) => ServerError::Transport(err),
                },
                Err(err) => err,
            },
            Err(reason) => {
                warn!(conn = %conn.id(), url = request.url(), error = %reason, "handler failed, closing connection");
                // The writer closes the connection when it reaches this slot,
                // after the responses queued ahead of it.
                if request.error(reason).is_err() {
                    self.release(&conn);
                }
                return;
            }
        };

        debug!(conn = %conn.id(), url = request.url(), error = %failure, "response not delivered, closing connection");
        self.release(&conn);
    }

    /// Untracks and closes `conn`, tolerating a concurrent close.
    fn release(&self, conn: &HttpConn) {
        self.connections.untrack(conn.id());
        if let Err(err) = conn.close() {
            if !err.is_bad_resource() {
                debug!(conn = %conn.id(), error = %err, "close failed");
            }
        }
    }
}
