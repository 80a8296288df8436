#![allow(dead_code)]

pub mod tls;

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use std::time::Duration;

use native_http::Server;
use native_http::transport::{Connection, Listener, TransportError, TransportErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls until the server reports a listening address.
pub async fn wait_for_listener(server: &Server) -> SocketAddr {
    loop {
        if let Some(addr) = server.addrs().first() {
            return *addr;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Sends raw request bytes and reads until the server closes the connection.
pub async fn roundtrip(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

/// An in-memory connection over a duplex pipe.
pub struct MemoryConn {
    io: DuplexStream,
    local: SocketAddr,
    remote: SocketAddr,
}

impl MemoryConn {
    /// Returns the server end and the client end.
    pub fn pair() -> (Self, DuplexStream) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let conn = Self {
            io: server,
            local: SocketAddr::from(([127, 0, 0, 1], 8000)),
            remote: SocketAddr::from(([127, 0, 0, 1], 40000)),
        };
        (conn, client)
    }
}

impl AsyncRead for MemoryConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl Connection for MemoryConn {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.remote)
    }
}

pub enum Step {
    Accept(MemoryConn),
    Fail(TransportErrorKind),
}

/// A listener that replays a script of accept outcomes, then blocks until
/// closed. Records when each accept was attempted.
pub struct ScriptedListener {
    script: Mutex<VecDeque<Step>>,
    attempts: Mutex<Vec<Instant>>,
    closed: watch::Sender<bool>,
}

impl ScriptedListener {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
            closed: watch::channel(false).0,
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl Listener for ScriptedListener {
    type Conn = MemoryConn;

    async fn accept(&self) -> Result<MemoryConn, TransportError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.is_closed() {
            return Err(TransportError::bad_resource("listener closed"));
        }
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Accept(conn)) => Ok(conn),
            Some(Step::Fail(kind)) => Err(TransportError::new(kind, io::Error::other("scripted failure"))),
            None => {
                let mut closed = self.closed.subscribe();
                let _ = closed.wait_for(|closed| *closed).await;
                Err(TransportError::bad_resource("listener closed"))
            }
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Err(TransportError::bad_resource("listener already closed"));
        }
        Ok(())
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 8000)))
    }
}
