//! Unified error type.

use std::fmt;
use std::io;

/// The error type returned by strand's fallible operations.
///
/// Application-level outcomes (404, 500, etc.) are expressed as HTTP
/// responses written through the [`Context`](crate::Context), not as
/// `Error`s. This type surfaces infrastructure failures and the two cases in
/// which the server must drop a connection without answering.
#[derive(Debug)]
pub enum Error {
    /// The address given to [`Server::bind`](crate::Server::bind) is not a
    /// valid `host:port` string.
    InvalidAddr(String),
    /// Binding to a port or accepting a connection failed.
    Io(io::Error),
    /// Reading the request body from the connection failed.
    Body(hyper::Error),
    /// A handler panicked and no isolation boundary caught it.
    HandlerPanicked,
    /// The request was abandoned via [`Context::hang_up`](crate::Context::hang_up).
    HungUp,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAddr(addr) => write!(f, "invalid socket address `{addr}`"),
            Self::Io(e)             => write!(f, "io: {e}"),
            Self::Body(e)           => write!(f, "reading request body: {e}"),
            Self::HandlerPanicked   => f.write_str("handler panicked outside an isolation boundary"),
            Self::HungUp            => f.write_str("request abandoned without a response"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e)   => Some(e),
            Self::Body(e) => Some(e),
            _             => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
