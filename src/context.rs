//! Per-request context and the cooperative continuation protocol.
//!
//! Every request gets one [`Context`]. It owns the request, a
//! status-capturing view of the response writer, a value bag middleware use
//! to talk to each other, and the chain resolved for the request's path.
//!
//! # `next()`
//!
//! A middleware calls [`Context::next`] to run everything after it (the rest
//! of the chain, then the terminal handler) and gets control back when that
//! finishes. Code before the call is its pre-logic, code after is its
//! post-logic:
//!
//! ```text
//! chain = [mw1, mw2], terminal = H
//!
//! mw1.pre → mw2.pre → H → mw2.post → mw1.post
//! ```
//!
//! A middleware that never calls `next()` simply falls through: the driver
//! moves on to the following link when it returns. Either way the terminal
//! handler runs at most once.
//!
//! Each explicit `next()` adds a stack frame. Chains are short (one entry per
//! `use_middleware` call along the path) so the depth is bounded by what was
//! registered, never by the request.

use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use hyper::upgrade::OnUpgrade;
use tracing::warn;

use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::response::{ContentType, ResponseWriter, StatusRecorder, set_content_type};

/// How a request ended, as reported by [`Router::handle`](crate::Router::handle).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// A response was written (possibly just a status). Carries the status
    /// the recorder saw last.
    Responded(StatusCode),
    /// The request was abandoned; nothing should be sent and the connection
    /// should be closed.
    HungUp,
}

/// The per-request state handed to every middleware and handler.
pub struct Context<'w> {
    request: Request,
    writer: StatusRecorder<'w>,
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
    chain: Vec<BoxedHandler>,
    terminal: BoxedHandler,
    index: usize,
    aborted: bool,
    served: bool,
    hung_up: bool,
}

impl<'w> Context<'w> {
    pub(crate) fn new(
        request: Request,
        writer: &'w mut dyn ResponseWriter,
        chain: Vec<BoxedHandler>,
        terminal: BoxedHandler,
    ) -> Self {
        Self {
            request,
            writer: StatusRecorder::new(writer),
            values: HashMap::new(),
            chain,
            terminal,
            index: 0,
            aborted: false,
            served: false,
            hung_up: false,
        }
    }

    pub(crate) fn outcome(&self) -> Outcome {
        if self.hung_up {
            Outcome::HungUp
        } else {
            Outcome::Responded(self.writer.status())
        }
    }

    // ── Control flow ──────────────────────────────────────────────────────────

    /// Run the remainder of the chain, then the terminal handler.
    ///
    /// Returns when everything downstream has finished or the request was
    /// aborted. Calling it again after that is a no-op.
    pub fn next(&mut self) {
        while self.index < self.chain.len() && !self.aborted {
            let link = Arc::clone(&self.chain[self.index]);
            self.index += 1;
            link(&mut *self);
        }

        if !self.aborted && !self.served {
            self.served = true;
            let terminal = Arc::clone(&self.terminal);
            terminal(&mut *self);
        }
    }

    /// Stop the chain. Middleware not yet started and the terminal handler
    /// will not run; whatever was already written stands.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Write `status` immediately, then [`abort`](Self::abort).
    pub fn abort_with_status(&mut self, status: StatusCode) {
        self.writer.write_header(status);
        self.abort();
    }

    /// Abort and ask the host to drop the connection without answering.
    pub fn hang_up(&mut self) {
        self.hung_up = true;
        self.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.request }
    pub fn method(&self) -> &Method { self.request.method() }
    pub fn path(&self) -> &str { self.request.path() }
    pub fn body(&self) -> &[u8] { self.request.body() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.request.remote_addr() }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.header(name)
    }

    pub fn query(&self, key: &str) -> Option<String> {
        self.request.query(key)
    }

    pub fn query_all(&self, key: &str) -> Vec<String> {
        self.request.query_all(key)
    }

    // ── Values ────────────────────────────────────────────────────────────────

    /// Store a value for middleware or handlers further down the chain.
    /// Replaces any previous value under `key`.
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Fetch a value stored with [`set`](Self::set). `None` when the key is
    /// missing or holds a different type.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref()
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut()
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    // ── Response ──────────────────────────────────────────────────────────────

    /// The status most recently written, `200 OK` if none was.
    pub fn status(&self) -> StatusCode {
        self.writer.status()
    }

    pub fn response_headers(&mut self) -> &mut HeaderMap {
        self.writer.headers_mut()
    }

    /// Set a response header. An empty `value` removes the header instead.
    /// Names or values that are not valid HTTP are logged and skipped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        let Ok(name) = HeaderName::try_from(name) else {
            warn!(name, "ignoring invalid response header name");
            return;
        };
        if value.is_empty() {
            self.writer.headers_mut().remove(&name);
            return;
        }
        match HeaderValue::try_from(value) {
            Ok(value) => {
                self.writer.headers_mut().insert(name, value);
            }
            Err(_) => warn!(%name, "ignoring invalid response header value"),
        }
    }

    pub fn write_header(&mut self, status: StatusCode) {
        self.writer.write_header(status);
    }

    /// Raw body write. Errors are returned, not raised.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write(buf)
    }

    /// Take over the underlying connection, if the host offers it.
    ///
    /// Write `101 Switching Protocols` and return; the upgraded I/O becomes
    /// available once the host has sent that status.
    pub fn hijack(&mut self) -> Option<OnUpgrade> {
        self.writer.hijack()
    }

    /// Respond with a `text/plain` body.
    ///
    /// # Panics
    ///
    /// Panics with the [`io::Error`] as payload if the body cannot be written.
    /// The recovery middleware recognises disconnected peers from it.
    pub fn text(&mut self, status: StatusCode, body: impl AsRef<str>) {
        self.render(status, ContentType::Text, body.as_ref().as_bytes());
    }

    /// Respond with an `application/json` body. strand does not serialise;
    /// pass the bytes from your encoder.
    ///
    /// # Panics
    ///
    /// Same as [`text`](Self::text).
    pub fn json(&mut self, status: StatusCode, body: impl AsRef<[u8]>) {
        self.render(status, ContentType::Json, body.as_ref());
    }

    /// Respond with a typed body.
    ///
    /// # Panics
    ///
    /// Same as [`text`](Self::text).
    pub fn bytes(&mut self, status: StatusCode, content_type: ContentType, body: impl AsRef<[u8]>) {
        self.render(status, content_type, body.as_ref());
    }

    /// Redirect to `location` with a 3xx `status`.
    pub fn redirect(&mut self, status: StatusCode, location: &str) {
        match HeaderValue::try_from(location) {
            Ok(value) => {
                self.writer.headers_mut().insert(LOCATION, value);
                self.writer.write_header(status);
            }
            Err(_) => {
                warn!(location, "redirect target is not a valid header value");
                self.writer.write_header(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    fn render(&mut self, status: StatusCode, content_type: ContentType, body: &[u8]) {
        set_content_type(&mut self.writer, content_type);
        self.writer.write_header(status);
        if let Err(e) = self.writer.write(body) {
            std::panic::panic_any(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::handler::boxed;
    use crate::response::BufferedResponse;

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    fn request() -> Request {
        http::Request::get("/").body(Bytes::new()).unwrap().into()
    }

    fn step(trace: &Trace, label: &'static str) {
        trace.lock().unwrap().push(label);
    }

    /// Middleware that logs `pre`, delegates, then logs `post`.
    fn wrapping(trace: &Trace, pre: &'static str, post: &'static str) -> BoxedHandler {
        let trace = Arc::clone(trace);
        boxed(move |c| {
            step(&trace, pre);
            c.next();
            step(&trace, post);
        })
    }

    /// Middleware that logs and returns without delegating.
    fn falling_through(trace: &Trace, label: &'static str) -> BoxedHandler {
        let trace = Arc::clone(trace);
        boxed(move |_| step(&trace, label))
    }

    fn terminal(trace: &Trace) -> BoxedHandler {
        falling_through(trace, "handler")
    }

    fn run(chain: Vec<BoxedHandler>, terminal: BoxedHandler) -> BufferedResponse {
        let mut response = BufferedResponse::new();
        let mut ctx = Context::new(request(), &mut response, chain, terminal);
        ctx.next();
        response
    }

    #[test]
    fn post_logic_unwinds_lifo() {
        let trace = Trace::default();
        run(
            vec![wrapping(&trace, "mw1.pre", "mw1.post"), wrapping(&trace, "mw2.pre", "mw2.post")],
            terminal(&trace),
        );
        assert_eq!(
            *trace.lock().unwrap(),
            ["mw1.pre", "mw2.pre", "handler", "mw2.post", "mw1.post"]
        );
    }

    #[test]
    fn fall_through_still_reaches_handler_once() {
        let trace = Trace::default();
        run(
            vec![falling_through(&trace, "a"), falling_through(&trace, "b")],
            terminal(&trace),
        );
        assert_eq!(*trace.lock().unwrap(), ["a", "b", "handler"]);
    }

    #[test]
    fn mixed_delegation_serves_once() {
        let trace = Trace::default();
        run(
            vec![
                falling_through(&trace, "a"),
                wrapping(&trace, "b.pre", "b.post"),
                falling_through(&trace, "c"),
            ],
            terminal(&trace),
        );
        assert_eq!(*trace.lock().unwrap(), ["a", "b.pre", "c", "handler", "b.post"]);
    }

    #[test]
    fn abort_stops_downstream_but_upstream_post_logic_runs() {
        let trace = Trace::default();
        let aborting = {
            let trace = Arc::clone(&trace);
            boxed(move |c| {
                step(&trace, "mw2.pre");
                c.abort();
            })
        };
        run(
            vec![
                wrapping(&trace, "mw1.pre", "mw1.post"),
                aborting,
                falling_through(&trace, "mw3"),
            ],
            terminal(&trace),
        );
        assert_eq!(*trace.lock().unwrap(), ["mw1.pre", "mw2.pre", "mw1.post"]);
    }

    #[test]
    fn abort_with_status_writes_status_and_skips_handler() {
        let trace = Trace::default();
        let response = run(
            vec![boxed(|c| c.abort_with_status(StatusCode::UNAUTHORIZED))],
            terminal(&trace),
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(trace.lock().unwrap().is_empty());
    }

    #[test]
    fn next_after_completion_is_noop() {
        let trace = Trace::default();
        let mut response = BufferedResponse::new();
        let mut ctx = Context::new(request(), &mut response, vec![], terminal(&trace));
        ctx.next();
        ctx.next();
        assert_eq!(*trace.lock().unwrap(), ["handler"]);
    }

    #[test]
    fn repeated_next_in_one_middleware_serves_once() {
        let trace = Trace::default();
        let greedy = boxed(|c| {
            c.next();
            c.next();
        });
        run(vec![greedy], terminal(&trace));
        assert_eq!(*trace.lock().unwrap(), ["handler"]);
    }

    #[test]
    fn values_flow_between_links() {
        let setter = boxed(|c| c.set("user", String::from("alice")));
        let reader = boxed(|c| {
            let user = c.get::<String>("user").cloned().unwrap_or_default();
            c.text(StatusCode::OK, user);
        });
        let response = run(vec![setter], reader);
        assert_eq!(response.body(), b"alice");
    }

    #[test]
    fn get_with_wrong_type_is_none() {
        let mut response = BufferedResponse::new();
        let mut ctx = Context::new(request(), &mut response, vec![], boxed(|_| {}));
        ctx.set("n", 7_u32);
        assert_eq!(ctx.get::<u32>("n"), Some(&7));
        assert!(ctx.get::<i64>("n").is_none());
        *ctx.get_mut::<u32>("n").unwrap() += 1;
        assert_eq!(ctx.get::<u32>("n"), Some(&8));
        assert!(ctx.remove("n"));
        assert!(!ctx.remove("n"));
    }

    #[test]
    fn hang_up_reports_no_response() {
        let mut response = BufferedResponse::new();
        let mut ctx = Context::new(
            request(),
            &mut response,
            vec![boxed(|c| c.hang_up())],
            boxed(|c| c.text(StatusCode::OK, "unreachable")),
        );
        ctx.next();
        assert_eq!(ctx.outcome(), Outcome::HungUp);
        assert!(ctx.is_aborted());
        drop(ctx);
        assert!(response.committed_status().is_none());
    }

    #[test]
    fn set_header_with_empty_value_removes_it() {
        let handler = boxed(|c| {
            c.set_header("X-Trace", "abc");
            c.set_header("X-Gone", "1");
            c.set_header("X-Gone", "");
            c.write_header(StatusCode::NO_CONTENT);
        });
        let response = run(vec![], handler);
        assert_eq!(response.header("x-trace"), Some("abc"));
        assert_eq!(response.header("x-gone"), None);
    }

    #[test]
    fn redirect_sets_location() {
        let response = run(vec![], boxed(|c| c.redirect(StatusCode::FOUND, "/login")));
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.header("location"), Some("/login"));
    }

    #[test]
    fn json_sets_content_type() {
        let response = run(vec![], boxed(|c| c.json(StatusCode::OK, br#"{"key":"value"}"#)));
        assert_eq!(response.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(response.body(), br#"{"key":"value"}"#);
    }

    #[test]
    fn bytes_uses_the_given_content_type() {
        for (content_type, expected) in [
            (ContentType::Html, "text/html; charset=utf-8"),
            (ContentType::OctetStream, "application/octet-stream"),
        ] {
            let response = run(vec![], boxed(move |c| c.bytes(StatusCode::OK, content_type, b"\x00\x01")));
            assert_eq!(response.header("content-type"), Some(expected));
            assert_eq!(response.body(), b"\x00\x01");
        }
    }
}
