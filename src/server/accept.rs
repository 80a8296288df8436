//! Accept loop: one per served listener.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::Shared;
use super::backoff::Backoff;
use crate::error::ServerError;
use crate::transport::{HttpConn, Incoming, Listener};

impl Shared {
    /// Accepts connections until the server closes or `listener` fails
    /// with a non-transient error.
    ///
    /// Each accepted stream is established and served on its own task, so
    /// the loop only ever waits on the listener.
    pub(super) async fn accept_loop<L: Listener>(self: &Arc<Self>, listener: &L) -> Result<(), ServerError> {
        let mut backoff = Backoff::new(&self.config.backoff);

        while !self.closed.is_fired() {
            let incoming = match listener.accept().await {
                Ok(incoming) => {
                    backoff.reset();
                    incoming
                }
                Err(err) if err.is_transient() => {
                    if self.closed.is_fired() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    debug!(
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient accept failure, backing off"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.closed.wait() => break,
                    }
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    return Err(ServerError::Accept(err));
                }
            };

            let shared = Arc::clone(self);
            tokio::spawn(async move { shared.admit(incoming).await });
        }

        Ok(())
    }

    /// Completes any handshake, then tracks and serves the connection.
    async fn admit<I: Incoming>(self: Arc<Self>, incoming: I) {
        let conn = tokio::select! {
            biased;
            () = self.closed.wait() => return,
            conn = incoming.establish() => conn,
        };
        let conn = match conn.and_then(|conn| HttpConn::upgrade(conn, &self.config.http)) {
            Ok(conn) => Arc::new(conn),
            Err(err) => {
                trace!(error = %err, "discarding connection that failed to establish");
                return;
            }
        };

        if !self.connections.track(Arc::clone(&conn)) {
            // Shutdown sealed the tracker while this connection was being established.
            let _ = conn.close();
            return;
        }
        self.serve_connection(conn).await;
    }
}
