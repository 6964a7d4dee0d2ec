//! # strand
//!
//! An embeddable HTTP request pipeline: path-scoped middleware, a
//! cooperative `next()`, and per-request panic isolation.
//!
//! ## The model
//!
//! - **Middleware is scoped by path prefix.** Register it globally or on a
//!   group; a request to `/api/v1/users` runs global middleware, then the
//!   `/api` group's, then the `/api/v1` group's, each in registration order.
//! - **`next()` is the only control primitive.** A middleware calls
//!   [`Context::next`] to run everything after it and resumes when that
//!   returns, or does not call it and simply falls through. The route handler
//!   runs at most once, at the end.
//! - **Abort is final.** After [`Context::abort`] nothing downstream runs.
//! - **Panics stay in their request** once [`middleware::recovery`] is
//!   installed: a `500` for bugs, a silent close when the client already left.
//!
//! Everything runs synchronously on one thread per request. Handlers are
//! plain functions.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use strand::{Context, Router, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .use_middleware(middleware::recovery)
//!         .use_middleware(middleware::trace)
//!         .get("/hello", hello)
//!         .group("/admin", |admin| {
//!             admin.use_middleware(require_token).get("/stats", stats);
//!         });
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn hello(c: &mut Context) {
//!     c.text(StatusCode::OK, "Hello World");
//! }
//!
//! fn require_token(c: &mut Context) {
//!     match c.header("authorization") {
//!         Some(token) => {
//!             let user = token.trim_start_matches("Bearer ").to_owned();
//!             c.set("user", user);
//!         }
//!         None => c.abort_with_status(StatusCode::UNAUTHORIZED),
//!     }
//! }
//!
//! fn stats(c: &mut Context) {
//!     let user = c.get::<String>("user").cloned().unwrap_or_default();
//!     // strand sends bytes; serialise however you like.
//!     c.json(StatusCode::OK, format!(r#"{{"viewer":"{user}"}}"#));
//! }
//! ```

mod context;
mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use context::{Context, Outcome};
pub use error::Error;
pub use request::Request;
pub use response::{BufferedResponse, ContentType, ResponseWriter, StatusRecorder};
pub use router::{Group, Router};
pub use server::{DEFAULT_MAX_HEADER_BYTES, Server};
