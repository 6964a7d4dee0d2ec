//! HTTP server and graceful shutdown.
//!
//! The server is a thin host around [`Router::handle`]. For each request it
//! reads the body, then runs the whole middleware chain and handler on
//! tokio's blocking pool: handlers are plain synchronous functions and may
//! block. The buffered response is handed back to hyper once the chain
//! returns.
//!
//! Two outcomes close the connection without writing a byte: a request that
//! was hung up (the recovery middleware does this when the peer is gone) and
//! a panic that no recovery middleware caught. The second is logged; the
//! process keeps serving.
//!
//! # Graceful shutdown
//!
//! On SIGTERM or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{CONNECTION, HeaderMap};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::context::Outcome;
use crate::error::Error;
use crate::request::Request;
use crate::response::BufferedResponse;
use crate::router::Router;

/// Default cap on the HTTP/1 read buffer, which bounds the request head.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

/// hyper refuses smaller read buffers.
const MIN_HEADER_BYTES: usize = 8 * 1024;

enum Bind {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    max_header_bytes: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is parsed then; an invalid one makes `serve`
    /// return [`Error::InvalidAddr`].
    ///
    /// ```rust,no_run
    /// use strand::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self { bind: Bind::Addr(addr.to_owned()), max_header_bytes: DEFAULT_MAX_HEADER_BYTES }
    }

    /// Serve on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { bind: Bind::Listener(listener), max_header_bytes: DEFAULT_MAX_HEADER_BYTES }
    }

    /// Cap the size of a request head. Values below 8 KiB are raised to it.
    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.max_header_bytes = bytes.max(MIN_HEADER_BYTES);
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve), but stops accepting when `signal`
    /// resolves instead of on a process signal.
    pub async fn serve_with_shutdown<S>(self, router: Router, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let listener = match self.bind {
            Bind::Listener(listener) => listener,
            Bind::Addr(addr) => {
                let addr: SocketAddr = addr.parse().map_err(|_| Error::InvalidAddr(addr))?;
                TcpListener::bind(addr).await?
            }
        };
        let local = listener.local_addr()?;

        // Registration is over: the router is shared read-only from here on.
        let router = Arc::new(router);

        let mut conn = ConnBuilder::new(TokioExecutor::new());
        conn.http1().max_buf_size(self.max_header_bytes);

        info!(
            addr = %local,
            routes = router.route_count(),
            middleware = router.middleware_count(),
            "strand listening"
        );

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // Check shutdown first so a signal immediately stops
                // accepting new connections, even if more are queued.
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let router = Arc::clone(&router);
                    let conn = conn.clone();
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not once
                        // per connection.
                        let svc = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            async move { dispatch(router, req, remote_addr).await }
                        });

                        if let Err(e) = conn.serve_connection_with_upgrades(io, svc).await {
                            debug!(peer = %remote_addr, "connection closed: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection to finish before we return.
        while tasks.join_next().await.is_some() {}

        info!("strand stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Routes one request and produces one response.
///
/// An `Err` makes hyper drop the connection without responding; that is the
/// intended behaviour for [`Error::HungUp`] and [`Error::HandlerPanicked`].
async fn dispatch(
    router: Arc<Router>,
    mut req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Error> {
    let upgrade = wants_upgrade(req.headers()).then(|| hyper::upgrade::on(&mut req));
    let (parts, body) = req.into_parts();
    let body = body.collect().await.map_err(Error::Body)?.to_bytes();
    let request = Request::from_parts(parts, body).with_remote_addr(remote_addr);

    let begin = Instant::now();
    let joined = tokio::task::spawn_blocking(move || {
        let mut response = match upgrade {
            Some(upgrade) => BufferedResponse::new().with_upgrade(upgrade),
            None => BufferedResponse::new(),
        };
        let outcome = router.handle(request, &mut response);
        (outcome, response)
    })
    .await;

    let (outcome, response) = match joined {
        Ok(done) => done,
        Err(e) if e.is_panic() => {
            error!(peer = %remote_addr, "handler panicked with no recovery middleware installed");
            return Err(Error::HandlerPanicked);
        }
        Err(e) => {
            warn!(peer = %remote_addr, "request task cancelled: {e}");
            return Err(Error::HandlerPanicked);
        }
    };

    match outcome {
        Outcome::Responded(status) => {
            debug!(
                status = status.as_u16(),
                latency = ?begin.elapsed(),
                peer = %remote_addr,
                "request served"
            );
            Ok(response.into_http())
        }
        Outcome::HungUp => {
            debug!(peer = %remote_addr, "request hung up, closing connection");
            Err(Error::HungUp)
        }
    }
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C). On
/// Windows only Ctrl-C is available. If a handler cannot be installed that
/// arm never fires; the server keeps running until the other one does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` is a future that never resolves; on non-Unix platforms
    // the SIGTERM arm is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
