mod common;

use std::sync::Arc;
use std::time::Duration;

use native_http::transport::TransportErrorKind;
use native_http::{HandlerError, Response, Server, ServerConfig, ServerError, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{MemoryConn, ScriptedListener, Step, init_tracing};

fn server() -> Server {
    Server::new(ServerConfig::default(), |req, _info| async move {
        Ok::<_, HandlerError>(Response::new(StatusCode::OK).body(req.url().to_owned()))
    })
}

async fn wait_for_attempts(listener: &ScriptedListener, n: usize) {
    while listener.attempts().len() < n {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_and_success_resets() {
    init_tracing();
    let (conn, _client) = MemoryConn::pair();
    let listener = Arc::new(ScriptedListener::new([
        Step::Fail(TransportErrorKind::ConnectionReset),
        Step::Fail(TransportErrorKind::UnexpectedEof),
        Step::Fail(TransportErrorKind::InvalidData),
        Step::Accept(conn),
        Step::Fail(TransportErrorKind::NotConnected),
    ]));
    let server = server();
    let serving = {
        let server = server.clone();
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { server.serve(listener).await })
    };

    wait_for_attempts(&listener, 6).await;
    let attempts = listener.attempts();
    let gaps: Vec<u128> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(gaps[..5], [5, 10, 20, 0, 5]);

    server.close().unwrap();
    serving.await.unwrap().unwrap();
    assert!(listener.is_closed());
}

#[tokio::test]
async fn fatal_accept_error_ends_serve_and_closes_listener() {
    init_tracing();
    let listener = Arc::new(ScriptedListener::new([Step::Fail(TransportErrorKind::Other)]));
    let server = server();

    let err = server.serve(Arc::clone(&listener)).await.unwrap_err();
    assert!(matches!(
        err,
        ServerError::Accept(ref source) if source.kind() == TransportErrorKind::Other
    ));
    assert!(listener.is_closed());
    assert!(server.addrs().is_empty());
    assert!(!server.is_closed());
}

#[tokio::test]
async fn accepted_connections_are_tracked_and_served() {
    init_tracing();
    let mut clients = Vec::new();
    let mut script = Vec::new();
    for _ in 0..4 {
        let (conn, client) = MemoryConn::pair();
        script.push(Step::Accept(conn));
        clients.push(client);
    }
    let listener = Arc::new(ScriptedListener::new(script));
    let server = server();
    let serving = {
        let server = server.clone();
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { server.serve(listener).await })
    };

    for (n, client) in clients.iter_mut().enumerate() {
        let request = format!("GET /conn/{n} HTTP/1.1\r\nHost: mem\r\n\r\n");
        client.write_all(request.as_bytes()).await.unwrap();
        let mut buf = vec![0; 512];
        let len = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..len]).into_owned();
        assert!(response.ends_with(&format!("/conn/{n}")), "{response}");
    }
    assert_eq!(server.connection_count(), 4);

    // A client hanging up ends its connection and untracks it.
    drop(clients.pop());
    while server.connection_count() != 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    server.close().unwrap();
    serving.await.unwrap().unwrap();
    assert_eq!(server.connection_count(), 0);
    for mut client in clients {
        let mut rest = Vec::new();
        assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn serve_after_close_closes_nothing_and_fails() {
    let listener = Arc::new(ScriptedListener::new([]));
    let server = server();
    server.close().unwrap();
    assert!(matches!(
        server.serve(Arc::clone(&listener)).await,
        Err(ServerError::ServerClosed)
    ));
    assert!(listener.attempts().is_empty());
}
