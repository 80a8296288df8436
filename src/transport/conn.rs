//! HTTP/1.1 request/response exchange over one accepted connection.
//!
//! The read side frames requests and hands them out as [`RequestEvent`]s.
//! Every event gets a slot in an ordered queue that a per-connection writer
//! task drains, so a slow response for request N holds back the bytes of
//! N+1 but never the delivery of N+1 to its handler. At most
//! [`HttpConfig::max_in_flight_requests`] slots are outstanding; past that
//! the reader stops pulling bytes until the writer catches up.

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tracing::{debug, trace};

use super::{
    ConnInfo, Connection, Io, RequestEvent, ResourceId, ResponseFuture, TransportError, Upgraded,
};
use crate::config::HttpConfig;
use crate::error::BoxError;
use crate::http::{Method, Request, RequestError, Response, StatusCode};
use crate::latch::Latch;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

struct RequestReader {
    io: ReadHalf<Box<dyn Io>>,
    buf: BytesMut,
    /// No further requests will be framed: the peer closed, asked to close,
    /// sent garbage, or asked to switch protocols.
    done: bool,
}

enum Frame {
    Respond(Pending),
    /// Nothing follows; the writer exits after the frames queued before it.
    End,
}

struct Pending {
    response: oneshot::Receiver<ResponseFuture>,
    written: oneshot::Sender<Result<(), TransportError>>,
    keep_alive: bool,
    include_body: bool,
    upgrade: Option<oneshot::Sender<Upgraded>>,
    /// Returned to the reader once the response is written or abandoned.
    _permit: OwnedSemaphorePermit,
}

/// Settlement sender plus write acknowledgement for one queued response.
type Slot = (
    oneshot::Sender<ResponseFuture>,
    oneshot::Receiver<Result<(), TransportError>>,
);

enum Next {
    Event(RequestEvent),
    End,
    Failed(TransportError),
}

/// Outcome of framing the buffered bytes.
enum Framed {
    Request {
        request: Request,
        keep_alive: bool,
        upgradable: bool,
    },
    Reject(StatusCode, String),
}

/// A connection upgraded to a sequence of HTTP/1.1 exchanges.
pub struct HttpConn {
    id: ResourceId,
    info: ConnInfo,
    scheme: &'static str,
    max_request_size: usize,
    in_flight: Arc<Semaphore>,
    reader: Arc<Mutex<Option<RequestReader>>>,
    frames: mpsc::UnboundedSender<Frame>,
    closed: Latch,
    finished: Latch,
}

impl HttpConn {
    /// Takes ownership of `conn` and starts its writer task.
    ///
    /// # Errors
    ///
    /// Fails if the socket addresses cannot be read, which in practice means
    /// the peer is already gone.
    pub fn upgrade<C: Connection>(conn: C, config: &HttpConfig) -> Result<Self, TransportError> {
        let info = ConnInfo {
            local_addr: conn.local_addr()?,
            remote_addr: conn.remote_addr()?,
        };
        let scheme = conn.scheme();
        let io: Box<dyn Io> = Box::new(conn);
        let (read_half, write_half) = tokio::io::split(io);

        let id = ResourceId::next();
        let reader = Arc::new(Mutex::new(Some(RequestReader {
            io: read_half,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
            done: false,
        })));
        let (frames, queue) = mpsc::unbounded_channel();
        let closed = Latch::new();
        let finished = Latch::new();

        tokio::spawn(
            Writer {
                id,
                io: write_half,
                queue,
                reader: Arc::clone(&reader),
                closed: closed.clone(),
                finished: finished.clone(),
            }
            .run(),
        );

        Ok(Self {
            id,
            info,
            scheme,
            max_request_size: config.max_request_size,
            in_flight: Arc::new(Semaphore::new(config.in_flight_limit())),
            reader,
            frames,
            closed,
            finished,
        })
    }

    /// Process-unique id of this connection.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Local and remote addresses captured at upgrade.
    pub fn info(&self) -> ConnInfo {
        self.info
    }

    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_fired()
    }

    /// Waits for the next request.
    ///
    /// Returns `Ok(None)` at end of stream, which is only reported after the
    /// responses to every earlier request have been written, or as soon as
    /// the connection is closed.
    pub async fn next_request(&self) -> Result<Option<RequestEvent>, TransportError> {
        match self.read_next().await {
            Next::Event(event) => Ok(Some(event)),
            Next::Failed(err) => Err(err),
            Next::End => {
                let _ = self.frames.send(Frame::End);
                tokio::select! {
                    () = self.finished.wait() => {}
                    () = self.closed.wait() => {}
                }
                Ok(None)
            }
        }
    }

    /// Closes the connection. Queued responses that have not been written
    /// yet are dropped.
    ///
    /// # Errors
    ///
    /// `BadResource` if the connection was already closed.
    pub fn close(&self) -> Result<(), TransportError> {
        if !self.closed.fire() {
            return Err(TransportError::bad_resource("connection already closed"));
        }
        trace!(conn = %self.id, "connection closed");
        // A reader blocked in `next_request` drops its half itself once it
        // observes the latch.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        Ok(())
    }

    async fn read_next(&self) -> Next {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Next::End;
        };
        if reader.done || self.closed.is_fired() {
            return Next::End;
        }
        let permit = tokio::select! {
            biased;
            () = self.closed.wait() => return Next::End,
            permit = Arc::clone(&self.in_flight).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return Next::End,
            },
        };
        let next = self.pull(reader, permit).await;
        if self.closed.is_fired() {
            guard.take();
        }
        next
    }

    async fn pull(&self, reader: &mut RequestReader, permit: OwnedSemaphorePermit) -> Next {
        loop {
            match self.frame(reader) {
                Some(Framed::Request {
                    request,
                    keep_alive,
                    upgradable,
                }) => return self.dispatch(request, keep_alive, upgradable, permit),
                Some(Framed::Reject(status, reason)) => return self.reject(status, &reason, permit),
                None => {}
            }

            if reader.buf.capacity() - reader.buf.len() < INITIAL_BUF_SIZE / 4 {
                reader.buf.reserve(INITIAL_BUF_SIZE);
            }
            let read = tokio::select! {
                biased;
                () = self.closed.wait() => return Next::End,
                read = reader.io.read_buf(&mut reader.buf) => read,
            };
            match read {
                Ok(0) => {
                    reader.done = true;
                    if !reader.buf.is_empty() {
                        debug!(
                            conn = %self.id,
                            peer = %self.info.remote_addr,
                            buffered = reader.buf.len(),
                            "peer closed mid-request"
                        );
                    }
                    return Next::End;
                }
                Ok(_) => {}
                Err(err) => {
                    reader.done = true;
                    return Next::Failed(err.into());
                }
            }
        }
    }

    /// Frames one request from the buffer, or returns `None` if more bytes
    /// are needed.
    fn frame(&self, reader: &mut RequestReader) -> Option<Framed> {
        if reader.buf.is_empty() {
            return None;
        }
        match Request::parse(&reader.buf, self.max_request_size) {
            Ok((mut request, consumed)) => {
                let _ = reader.buf.split_to(consumed);
                request.resolve_url(self.scheme, &self.info.local_addr.to_string());

                let upgradable = request.wants_upgrade();
                let keep_alive = request.is_keep_alive() && !upgradable;
                if !keep_alive {
                    reader.done = true;
                }
                trace!(
                    conn = %self.id,
                    method = %request.method(),
                    url = request.url(),
                    "request framed"
                );
                Some(Framed::Request {
                    request,
                    keep_alive,
                    upgradable,
                })
            }
            // While a request is incomplete, every buffered byte belongs to it.
            Err(RequestError::Incomplete) if reader.buf.len() > self.max_request_size => {
                reader.done = true;
                Some(Framed::Reject(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "request head too large".to_owned(),
                ))
            }
            Err(RequestError::Incomplete) => None,
            Err(err) => {
                reader.done = true;
                let status = match err {
                    RequestError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    RequestError::UnsupportedTransferEncoding => StatusCode::NOT_IMPLEMENTED,
                    _ => StatusCode::BAD_REQUEST,
                };
                Some(Framed::Reject(status, err.to_string()))
            }
        }
    }

    fn dispatch(
        &self,
        request: Request,
        keep_alive: bool,
        upgradable: bool,
        permit: OwnedSemaphorePermit,
    ) -> Next {
        let (upgrade_tx, upgrade_rx) = if upgradable {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let include_body = request.method() != &Method::Head;

        match self.enqueue(keep_alive, include_body, upgrade_tx, permit) {
            Some((settle, written)) => {
                Next::Event(RequestEvent::new(request, settle, written, upgrade_rx))
            }
            None => Next::End,
        }
    }

    /// Queues an error response behind everything already in flight and
    /// ends the request sequence.
    fn reject(&self, status: StatusCode, reason: &str, permit: OwnedSemaphorePermit) -> Next {
        debug!(
            conn = %self.id,
            peer = %self.info.remote_addr,
            status = status.as_u16(),
            error = reason,
            "rejecting request"
        );
        let response = Response::new(status)
            .body(format!("{}: {reason}", status.canonical_reason()))
            .keep_alive(false);
        if let Some((settle, _)) = self.enqueue(false, true, None, permit) {
            let _ = settle.send(Box::pin(std::future::ready(Ok::<_, BoxError>(response))));
        }
        Next::End
    }

    fn enqueue(
        &self,
        keep_alive: bool,
        include_body: bool,
        upgrade: Option<oneshot::Sender<Upgraded>>,
        permit: OwnedSemaphorePermit,
    ) -> Option<Slot> {
        let (settle, response) = oneshot::channel();
        let (written_tx, written) = oneshot::channel();
        self.frames
            .send(Frame::Respond(Pending {
                response,
                written: written_tx,
                keep_alive,
                include_body,
                upgrade,
                _permit: permit,
            }))
            .ok()?;
        Some((settle, written))
    }
}

impl fmt::Debug for HttpConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConn")
            .field("id", &self.id)
            .field("info", &self.info)
            .field("scheme", &self.scheme)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

enum Step {
    Continue,
    Stop,
    Upgrade(oneshot::Sender<Upgraded>),
}

/// Writes responses in queue order until the connection ends.
struct Writer {
    id: ResourceId,
    io: WriteHalf<Box<dyn Io>>,
    queue: mpsc::UnboundedReceiver<Frame>,
    reader: Arc<Mutex<Option<RequestReader>>>,
    closed: Latch,
    finished: Latch,
}

impl Writer {
    async fn run(mut self) {
        let (forced, upgrade) = loop {
            let pending = tokio::select! {
                biased;
                () = self.closed.wait() => break (true, None),
                frame = self.queue.recv() => match frame {
                    Some(Frame::Respond(pending)) => pending,
                    Some(Frame::End) | None => break (false, None),
                },
            };
            match self.write(pending).await {
                Step::Continue => {}
                Step::Stop => break (self.closed.is_fired(), None),
                Step::Upgrade(tx) => break (false, Some(tx)),
            }
        };

        self.closed.fire();
        let reader = self.reader.lock().await.take();

        match (upgrade, reader) {
            (Some(tx), Some(reader)) => {
                debug!(conn = %self.id, buffered = reader.buf.len(), "connection upgraded");
                let io = reader.io.unsplit(self.io);
                let _ = tx.send(Upgraded::new(io, reader.buf.freeze()));
            }
            (_, reader) => {
                drop(reader);
                if !forced {
                    if let Err(err) = self.io.shutdown().await {
                        trace!(conn = %self.id, error = %err, "shutdown failed");
                    }
                }
            }
        }
        self.finished.fire();
    }

    async fn write(&mut self, pending: Pending) -> Step {
        let Pending {
            response,
            written,
            keep_alive,
            include_body,
            upgrade,
            _permit,
        } = pending;

        let outcome = tokio::select! {
            biased;
            () = self.closed.wait() => return Step::Stop,
            outcome = settle(response) => outcome,
        };
        let response = match outcome {
            Ok(response) => response,
            Err(reason) => {
                debug!(conn = %self.id, error = %reason, "response failed, closing connection");
                return Step::Stop;
            }
        };

        let status = response.status();
        let keep_alive = keep_alive && response.is_keep_alive();
        let bytes = response.encode(keep_alive, include_body);

        let result = tokio::select! {
            biased;
            () = self.closed.wait() => Err(TransportError::bad_resource("connection closed")),
            result = write_flush(&mut self.io, &bytes) => result.map_err(TransportError::from),
        };
        let failed = result.is_err();
        let _ = written.send(result);
        if failed {
            return Step::Stop;
        }
        trace!(conn = %self.id, status = status.as_u16(), "response written");

        match upgrade {
            Some(tx) if status == StatusCode::SWITCHING_PROTOCOLS => Step::Upgrade(tx),
            _ if keep_alive => Step::Continue,
            _ => Step::Stop,
        }
    }
}

async fn settle(response: oneshot::Receiver<ResponseFuture>) -> Result<Response, BoxError> {
    match response.await {
        Ok(response) => response.await,
        Err(_) => Err("request dropped without a response".into()),
    }
}

async fn write_flush(io: &mut WriteHalf<Box<dyn Io>>, bytes: &[u8]) -> std::io::Result<()> {
    io.write_all(bytes).await?;
    io.flush().await
}
