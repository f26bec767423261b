//! End-to-end tests over real sockets with a fake upstream

use agent_gateway::gateway::Gateway;
use agent_gateway::http::parser::{ParseError, parse_http_request};
use agent_gateway::http::request::Request;
use agent_gateway::proxy::{Forwarder, Route, RouteKind, Router};
use agent_gateway::server::listener::serve;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

const UPSTREAM_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nX-Upstream: yes\r\n\r\nhello from upstream";

async fn read_full_request(socket: &mut TcpStream) -> Request {
    let mut buf = Vec::new();
    loop {
        match parse_http_request(&buf) {
            Ok((req, _)) => return req,
            Err(ParseError::Incomplete) => {}
            Err(e) => panic!("upstream got malformed request: {:?}", e),
        }
        let mut chunk = [0u8; 16 * 1024];
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "gateway closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Accepts one connection, records the request, replies and closes.
async fn spawn_upstream() -> (SocketAddr, oneshot::Receiver<Request>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_full_request(&mut socket).await;
        let _ = tx.send(request);
        socket.write_all(UPSTREAM_RESPONSE).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    (addr, rx)
}

/// Accepts one connection, optionally reads the request, writes `reply`
/// and then holds the socket open without ever finishing.
async fn spawn_stalled_upstream(read_request: bool, reply: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        if read_request {
            read_full_request(&mut socket).await;
        }
        socket.write_all(reply).await.unwrap();
        std::future::pending::<()>().await
    });

    addr
}

fn short_timeouts() -> Forwarder {
    Forwarder::new(Duration::from_millis(100), Duration::from_millis(100), true)
}

async fn spawn_gateway(api: SocketAddr, agents: SocketAddr) -> SocketAddr {
    let forwarder = Forwarder::new(Duration::from_secs(2), Duration::from_secs(2), true);
    spawn_gateway_with(api, agents, forwarder).await
}

async fn spawn_gateway_with(api: SocketAddr, agents: SocketAddr, forwarder: Forwarder) -> SocketAddr {
    let origin = |addr: SocketAddr| url::Url::parse(&format!("http://{}", addr)).unwrap();
    let router = Router::new(vec![
        Route::new(RouteKind::Api, "/api", origin(api)),
        Route::new(RouteKind::Agent, "/agent", origin(agents)),
    ]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(Gateway::new(router, forwarder))));
    addr
}

async fn send(gateway: SocketAddr, raw: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(gateway).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut out = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("gateway did not close the connection")
        .unwrap();
    out
}

/// An address nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_agent_request_is_rewritten_and_relayed() {
    let (agents, seen) = spawn_upstream().await;
    let gateway = spawn_gateway(closed_port().await, agents).await;

    let response = send(
        gateway,
        b"GET /agent?agentID=agent-42&model=gpt&temp=0.5 HTTP/1.1\r\nHost: dev.local:3000\r\n\r\n",
    )
    .await;

    assert_eq!(response, UPSTREAM_RESPONSE);

    let upstream_req = seen.await.unwrap();
    assert_eq!(upstream_req.path, "/agents/agent-42/ask?model=gpt&temp=0.5");
    assert_eq!(upstream_req.header("Host"), Some(agents.to_string().as_str()));
    assert_eq!(upstream_req.header("X-Forwarded-For"), Some("127.0.0.1"));
    assert_eq!(upstream_req.header("X-Forwarded-Host"), Some("dev.local:3000"));
}

#[tokio::test]
async fn test_api_request_strips_prefix_and_forwards_body() {
    let (api, seen) = spawn_upstream().await;
    let gateway = spawn_gateway(api, closed_port().await).await;

    let response = send(
        gateway,
        b"POST /api/v1/users?page=2 HTTP/1.1\r\nHost: dev.local\r\nContent-Length: 13\r\n\r\n{\"name\":\"a\"}\n",
    )
    .await;

    assert_eq!(response, UPSTREAM_RESPONSE);

    let upstream_req = seen.await.unwrap();
    assert_eq!(upstream_req.path, "/v1/users?page=2");
    assert_eq!(upstream_req.body, b"{\"name\":\"a\"}\n".to_vec());
}

#[tokio::test]
async fn test_invalid_agent_id_never_reaches_upstream() {
    let (agents, seen) = spawn_upstream().await;
    let gateway = spawn_gateway(closed_port().await, agents).await;

    let response = send(
        gateway,
        b"GET /agent?agentID=id%2F1 HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(text.ends_with("Missing or invalid agentID"));
    assert!(timeout(Duration::from_millis(200), seen).await.is_err());
}

#[tokio::test]
async fn test_unrouted_path_gets_not_found() {
    let gateway = spawn_gateway(closed_port().await, closed_port().await).await;

    let response = send(gateway, b"GET /static/app.js HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
}

#[tokio::test]
async fn test_rejections_keep_connection_alive() {
    let gateway = spawn_gateway(closed_port().await, closed_port().await).await;

    let response = send(
        gateway,
        b"GET /agent HTTP/1.1\r\n\r\nGET /nowhere HTTP/1.1\r\nConnection: close\r\n\r\n",
    )
    .await;
    let text = String::from_utf8(response).unwrap();

    assert_eq!(text.matches("HTTP/1.1 400 Bad Request").count(), 1);
    assert_eq!(text.matches("HTTP/1.1 404 Not Found").count(), 1);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let gateway = spawn_gateway(closed_port().await, closed_port().await).await;

    let response = send(gateway, b"GET /api/health HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
}

#[tokio::test]
async fn test_malformed_request_is_bad_request() {
    let gateway = spawn_gateway(closed_port().await, closed_port().await).await;

    let response = send(gateway, b"BREW /api HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(text.ends_with("Malformed request"));
}

fn post(target: &str, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "POST {} HTTP/1.1\r\nHost: dev.local\r\nContent-Length: {}\r\n\r\n",
        target,
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

#[tokio::test]
async fn test_large_body_is_forwarded() {
    let (api, seen) = spawn_upstream().await;
    let gateway = spawn_gateway(api, closed_port().await).await;

    let body = vec![b'x'; 2 * 1024 * 1024];
    let response = send(gateway, &post("/api/upload", &body)).await;

    assert_eq!(response, UPSTREAM_RESPONSE);
    let upstream_req = seen.await.unwrap();
    assert_eq!(upstream_req.path, "/upload");
    assert_eq!(upstream_req.body.len(), body.len());
}

#[tokio::test]
async fn test_silent_upstream_is_gateway_timeout() {
    let api = spawn_stalled_upstream(true, b"").await;
    let gateway = spawn_gateway_with(api, closed_port().await, short_timeouts()).await;

    let response = send(gateway, b"GET /api/slow HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
}

#[tokio::test]
async fn test_unaccepted_connect_is_gateway_timeout() {
    // Never accepts; once the backlog is full further connects hang.
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(1).unwrap();
    let api = listener.local_addr().unwrap();

    let mut backlog = Vec::new();
    for _ in 0..8 {
        if let Ok(Ok(stream)) = timeout(Duration::from_millis(50), TcpStream::connect(api)).await {
            backlog.push(stream);
        }
    }

    let gateway = spawn_gateway_with(api, closed_port().await, short_timeouts()).await;
    let response = send(gateway, b"GET /api/x HTTP/1.1\r\n\r\n").await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
    drop(listener);
}

#[tokio::test]
async fn test_upstream_that_never_reads_body_times_out() {
    let api = spawn_stalled_upstream(false, b"").await;
    let gateway = spawn_gateway_with(api, closed_port().await, short_timeouts()).await;

    let body = vec![b'y'; 32 * 1024 * 1024];
    let response = send(gateway, &post("/api/upload", &body)).await;
    let text = String::from_utf8(response).unwrap();

    assert!(text.starts_with("HTTP/1.1 504 Gateway Timeout\r\n"));
}

#[tokio::test]
async fn test_partial_response_then_stall_closes_client() {
    const PARTIAL: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial";
    let agents = spawn_stalled_upstream(true, PARTIAL).await;
    let gateway = spawn_gateway_with(closed_port().await, agents, short_timeouts()).await;

    let response = send(gateway, b"GET /agent?agentID=a1 HTTP/1.1\r\n\r\n").await;

    // Relayed bytes arrive as-is and no error response is appended.
    assert_eq!(response, PARTIAL);
}
