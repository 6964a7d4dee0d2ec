//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method, Uri};

/// An incoming HTTP request with its body fully collected.
///
/// Build one from an [`http::Request<Bytes>`] with `.into()`; the server does
/// the same after reading the body off the connection.
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            remote_addr: None,
        }
    }

    pub(crate) fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Peer address of the connection, when served from a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// First value of a query-string parameter.
    ///
    /// For `/search?q=rust&q=http`, `req.query("q")` returns `Some("rust")`.
    /// A key present with an empty value (`?q=`) is reported as absent.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .filter(|v| !v.is_empty())
    }

    /// Every value of a query-string parameter, in order of appearance.
    pub fn query_all(&self, key: &str) -> Vec<String> {
        self.query_pairs()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v)
            .collect()
    }

    fn query_pairs(&self) -> impl Iterator<Item = (String, String)> + '_ {
        let raw = self.uri.query().unwrap_or("");
        url::form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request {
        http::Request::get(uri).body(Bytes::new()).unwrap().into()
    }

    #[test]
    fn query_returns_first_value() {
        let req = get("/test?a=1&b=2&a=3");
        assert_eq!(req.query("a").as_deref(), Some("1"));
        assert_eq!(req.query("b").as_deref(), Some("2"));
        assert_eq!(req.query("missing"), None);
    }

    #[test]
    fn query_all_keeps_order() {
        let req = get("/test?a=1&a=2");
        assert_eq!(req.query_all("a"), vec!["1", "2"]);
        assert!(req.query_all("b").is_empty());
    }

    #[test]
    fn query_decodes_percent_and_plus() {
        let req = get("/search?q=hello+world%21");
        assert_eq!(req.query("q").as_deref(), Some("hello world!"));
    }

    #[test]
    fn empty_query_value_is_absent() {
        assert_eq!(get("/?q=").query("q"), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req: Request = http::Request::get("/")
            .header("X-Forwarded-For", "1.2.3.4")
            .body(Bytes::new())
            .unwrap()
            .into();
        assert_eq!(req.header("x-forwarded-for"), Some("1.2.3.4"));
        assert_eq!(req.header("not-exists"), None);
    }
}
