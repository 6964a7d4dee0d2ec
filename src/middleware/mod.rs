//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: access logging, panic isolation, request-id
//! injection, authentication-header inspection.
//!
//! A middleware is any `Fn(&mut Context)`. It is registered against a path
//! prefix with [`Router::use_middleware`](crate::Router::use_middleware) or
//! [`Group::use_middleware`](crate::Group::use_middleware) and runs for every
//! request at or beneath that prefix.
//!
//! Built-in middleware:
//! - [`recovery`]: panic boundary, `500` or silent hang-up
//! - [`trace`]: per-request span with method, path, status, latency

pub(crate) mod index;
mod recovery;
mod trace;

pub use recovery::recovery;
pub use trace::trace;
