//! Response sinks.
//!
//! Handlers never build a response value. They write through a
//! [`ResponseWriter`], in the order an HTTP/1.1 connection would: headers,
//! then the status line, then body bytes. Three pieces live here:
//!
//! - [`ResponseWriter`]: the sink a host server hands to
//!   [`Router::handle`](crate::Router::handle).
//! - [`StatusRecorder`]: wraps one writer for the lifetime of one request and
//!   remembers the last status passed through it, for logging.
//! - [`BufferedResponse`]: the in-memory writer the bundled server uses, and
//!   the one tests inspect.

use std::io;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use http::StatusCode;
use http_body_util::Full;
use hyper::upgrade::OnUpgrade;
use tracing::debug;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`Context::bytes`](crate::Context::bytes).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json; charset=utf-8
    OctetStream,  // application/octet-stream  (binary / file download)
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub(crate) fn as_header(self) -> HeaderValue {
        HeaderValue::from_static(match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        })
    }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// The writable half of an HTTP exchange.
///
/// The contract mirrors a streaming connection even when the implementation
/// buffers:
///
/// - header changes made after the status is written may be ignored;
/// - the first call to [`write_header`](Self::write_header) wins, later calls
///   are superfluous;
/// - [`write`](Self::write) without a prior status implies `200 OK`.
pub trait ResponseWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Raw-connection takeover. Writers that sit on a connection able to
    /// switch protocols return the pending upgrade exactly once; everything
    /// else keeps the default.
    fn hijack(&mut self) -> Option<OnUpgrade> {
        None
    }
}

// ── StatusRecorder ────────────────────────────────────────────────────────────

/// Status-capturing pass-through around exactly one [`ResponseWriter`].
///
/// Records the most recent status handed to
/// [`write_header`](ResponseWriter::write_header), or `200 OK` if none was.
/// Writes, headers and [`hijack`](ResponseWriter::hijack) are forwarded
/// untouched.
pub struct StatusRecorder<'w> {
    inner: &'w mut dyn ResponseWriter,
    status: StatusCode,
}

impl<'w> StatusRecorder<'w> {
    pub fn new(inner: &'w mut dyn ResponseWriter) -> Self {
        Self { inner, status: StatusCode::OK }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl ResponseWriter for StatusRecorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status = status;
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write(buf)
    }

    fn hijack(&mut self) -> Option<OnUpgrade> {
        self.inner.hijack()
    }
}

// ── BufferedResponse ──────────────────────────────────────────────────────────

/// A [`ResponseWriter`] that collects the whole response in memory.
///
/// The server converts it into a hyper response once the chain has finished.
/// Tests drive [`Router::handle`](crate::Router::handle) with one and read it
/// back through the accessors.
#[derive(Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    upgrade: Option<OnUpgrade>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer connection takeover through [`ResponseWriter::hijack`].
    pub fn with_upgrade(mut self, upgrade: OnUpgrade) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    /// Status actually committed, `None` if nothing was written yet.
    pub fn committed_status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Status the client would see: the committed one, or `200 OK`.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Convert into the response type hyper serves.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let mut response = http::Response::new(Full::new(self.body.freeze()));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseWriter for BufferedResponse {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        match self.status {
            None => self.status = Some(status),
            Some(committed) => {
                debug!(%committed, ignored = %status, "superfluous write_header call");
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(())
    }

    fn hijack(&mut self) -> Option<OnUpgrade> {
        self.upgrade.take()
    }
}

pub(crate) fn set_content_type(writer: &mut dyn ResponseWriter, content_type: ContentType) {
    writer.headers_mut().insert(CONTENT_TYPE, content_type.as_header());
}
