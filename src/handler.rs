//! Handler storage and type erasure.
//!
//! # How handlers are stored
//!
//! Route handlers and middleware share one shape: a plain function that takes
//! the per-request [`Context`]. The router keeps handlers of many concrete
//! types in the same tables, so each one is hidden behind a trait object:
//!
//! ```text
//! fn auth(c: &mut Context) { … }              ← user writes this
//!        ↓ router.use_middleware(auth)
//! boxed(auth)                                  ← Arc::new, once, at startup
//!        ↓  stored as BoxedHandler
//! Arc::clone(&handler)                         ← once per request, into the chain
//!        ↓
//! handler(&mut ctx)                            ← one vtable dispatch
//! ```
//!
//! Handlers are synchronous. A request runs start to finish on one thread;
//! there is no suspension point between links of the chain.

use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated, type-erased handler shared across concurrent requests.
///
/// The same type holds terminal route handlers and middleware. Registration
/// owns the `Arc`; a resolved chain holds clones of it for one request.
pub(crate) type BoxedHandler = Arc<dyn Fn(&mut Context<'_>) + Send + Sync + 'static>;

/// Erase a concrete handler.
pub(crate) fn boxed<H>(handler: H) -> BoxedHandler
where
    H: Fn(&mut Context<'_>) + Send + Sync + 'static,
{
    Arc::new(handler)
}
