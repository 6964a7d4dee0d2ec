use std::net::SocketAddr;
use std::time::Duration;

use http::StatusCode;
use strand::{Router, Server, middleware};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), strand::Error>>,
}

async fn start(router: Router) -> Running {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(router, async {
            let _ = stopped.await;
        }),
    );
    Running { addr, stop, task }
}

impl Running {
    async fn shutdown(self) {
        let _ = self.stop.send(());
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not drain in time")
            .unwrap();
        assert!(result.is_ok());
    }
}

/// Send one HTTP/1.1 request with `Connection: close` and read until the
/// server closes the socket.
async fn raw_request(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!("{method} {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n");
    stream.write_all(head.as_bytes()).await.unwrap();
    let mut raw = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .expect("server did not close the connection");
    String::from_utf8_lossy(&raw).into_owned()
}

#[tokio::test]
async fn serves_a_route() {
    let server = start(Router::new().get("/hello", |c| c.text(StatusCode::OK, "Hello World"))).await;

    let raw = raw_request(server.addr, "GET", "/hello").await;
    assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
    assert!(raw.ends_with("Hello World"), "{raw}");

    server.shutdown().await;
}

#[tokio::test]
async fn unmatched_method_is_404() {
    let server = start(Router::new().get("/hello", |c| c.text(StatusCode::OK, "hi"))).await;

    let raw = raw_request(server.addr, "DELETE", "/hello").await;
    assert!(raw.starts_with("HTTP/1.1 404 Not Found"), "{raw}");
    assert!(raw.ends_with("\r\n\r\n404 page not found\n"), "{raw}");

    server.shutdown().await;
}

#[tokio::test]
async fn recovered_panic_is_500_and_server_survives() {
    let router = Router::with_defaults()
        .get("/boom", |_| panic!("this is a test panic"))
        .get("/ok", |c| c.text(StatusCode::OK, "still here"));
    let server = start(router).await;

    let raw = raw_request(server.addr, "GET", "/boom").await;
    assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error"), "{raw}");

    let raw = raw_request(server.addr, "GET", "/ok").await;
    assert!(raw.ends_with("still here"), "{raw}");

    server.shutdown().await;
}

#[tokio::test]
async fn unguarded_panic_closes_connection_without_bytes() {
    let router = Router::new()
        .get("/boom", |_| panic!("nobody catches this"))
        .get("/ok", |c| c.text(StatusCode::OK, "still here"));
    let server = start(router).await;

    let raw = raw_request(server.addr, "GET", "/boom").await;
    assert!(raw.is_empty(), "{raw}");

    let raw = raw_request(server.addr, "GET", "/ok").await;
    assert!(raw.ends_with("still here"), "{raw}");

    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_panic_closes_connection_without_bytes() {
    let router = Router::new()
        .use_middleware(middleware::recovery)
        .get("/gone", |_| {
            std::panic::panic_any(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        });
    let server = start(router).await;

    let raw = raw_request(server.addr, "GET", "/gone").await;
    assert!(raw.is_empty(), "{raw}");

    server.shutdown().await;
}

#[tokio::test]
async fn shutdown_with_no_traffic_returns_ok() {
    let server = start(Router::new()).await;
    server.shutdown().await;
}
