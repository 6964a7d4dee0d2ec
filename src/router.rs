//! Route registration and dispatch.
//!
//! Routes are literal paths. A path ending in `/` is a subtree pattern and
//! also matches everything beneath it; the longest matching pattern wins and
//! an exact registration beats any pattern. No parameters, no wildcards.
//!
//! Each path owns a small method table. A request whose path matches but
//! whose method has no entry gets the same answer as an unknown path:
//! `404` with body `"404 page not found\n"`.
//!
//! Middleware is not attached to routes. It lives in a separate index keyed
//! by path prefix and is resolved from the request path on every dispatch,
//! so it also runs for requests that end in a 404. A route registered inside
//! a group remembers the group's [`Scope`]: middleware added to an enclosing
//! scope after the group was opened does not reach it.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use tracing::debug;

use crate::context::{Context, Outcome};
use crate::handler::{BoxedHandler, boxed};
use crate::middleware;
use crate::middleware::index::{MiddlewareIndex, Scope};
use crate::request::Request;
use crate::response::ResponseWriter;

/// The application router.
///
/// Build it once at startup and hand it to [`Server::serve`](crate::Server::serve),
/// which freezes it behind an `Arc`. Each registration call returns `self`
/// so registrations chain naturally.
///
/// ```rust
/// use http::StatusCode;
/// use strand::{Context, Router, middleware};
///
/// fn hello(c: &mut Context) {
///     c.text(StatusCode::OK, "Hello World");
/// }
///
/// fn require_token(c: &mut Context) {
///     if c.header("authorization").is_none() {
///         c.abort_with_status(StatusCode::UNAUTHORIZED);
///     }
/// }
///
/// let app = Router::new()
///     .use_middleware(middleware::recovery)
///     .get("/hello", hello)
///     .group("/admin", |admin| {
///         admin.use_middleware(require_token).get("/stats", hello);
///     });
/// ```
pub struct Router {
    routes: HashMap<String, MethodTable>,
    middleware: MiddlewareIndex,
    not_found: Route,
}

/// A terminal handler plus the middleware view it was registered under.
#[derive(Clone)]
struct Route {
    handler: BoxedHandler,
    scope: Arc<Scope>,
}

#[derive(Default)]
struct MethodTable {
    by_method: HashMap<Method, Route>,
    any: Option<Route>,
}

impl MethodTable {
    fn get(&self, method: &Method) -> Option<&Route> {
        self.by_method.get(method).or(self.any.as_ref())
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            middleware: MiddlewareIndex::new(),
            not_found: Route { handler: boxed(not_found), scope: Arc::default() },
        }
    }

    /// A router with [`middleware::recovery`] and then [`middleware::trace`]
    /// registered globally.
    pub fn with_defaults() -> Self {
        Self::new()
            .use_middleware(middleware::recovery)
            .use_middleware(middleware::trace)
    }

    /// Register middleware for every path. Runs in registration order, before
    /// any group middleware.
    pub fn use_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.middleware.register("/", boxed(middleware));
        self
    }

    /// Register a handler for a method + path pair. Registering the same pair
    /// again replaces the earlier handler.
    ///
    /// # Panics
    ///
    /// Panics if `path` does not start with `/`.
    pub fn on<H>(mut self, method: Method, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.insert(Some(method), path.to_owned(), Route::top_level(handler));
        self
    }

    /// Register a handler that answers every method at `path`. A handler
    /// registered for a specific method at the same path takes precedence.
    ///
    /// # Panics
    ///
    /// Panics if `path` does not start with `/`.
    pub fn any<H>(mut self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.insert(None, path.to_owned(), Route::top_level(handler));
        self
    }

    pub fn get<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::GET, path, handler)
    }

    pub fn post<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::POST, path, handler)
    }

    pub fn put<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::DELETE, path, handler)
    }

    pub fn head<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::HEAD, path, handler)
    }

    pub fn options<H>(self, path: &str, handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::OPTIONS, path, handler)
    }

    /// Open a registration scope under `prefix`. Routes registered in the
    /// group are prefixed; middleware registered in the group applies to
    /// paths under the prefix only.
    ///
    /// The group's routes see global middleware as it stands now. Calling
    /// [`use_middleware`](Self::use_middleware) after this returns does not
    /// affect them.
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let scope = self.middleware.open_scope(&Scope::default(), "/", prefix);
        let mut group = Group { router: &mut self, prefix: prefix.to_owned(), scope: Arc::new(scope) };
        build(&mut group);
        self
    }

    /// Run one request through the pipeline, writing the response to
    /// `writer`.
    ///
    /// The terminal handler is looked up from the path and method (a 404
    /// writer if nothing matches), the chain from the path and the scope that
    /// handler was registered in, and then [`Context::next`] drives both.
    pub fn handle(&self, request: Request, writer: &mut dyn ResponseWriter) -> Outcome {
        let route = self.route_for(request.method(), request.path());
        let chain = self.middleware.resolve(request.path(), &route.scope);
        let terminal = route.handler;
        debug!(
            method = %request.method(),
            path = request.path(),
            links = chain.len(),
            "dispatching"
        );

        let mut ctx = Context::new(request, writer, chain, terminal);
        ctx.next();
        ctx.outcome()
    }

    pub(crate) fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    fn insert(&mut self, method: Option<Method>, path: String, route: Route) {
        assert!(path.starts_with('/'), "route `{path}` must start with `/`");
        let table = self.routes.entry(path).or_default();
        match method {
            Some(method) => {
                table.by_method.insert(method, route);
            }
            None => table.any = Some(route),
        }
    }

    fn route_for(&self, method: &Method, path: &str) -> Route {
        self.lookup(path)
            .and_then(|table| table.get(method))
            .unwrap_or(&self.not_found)
            .clone()
    }

    fn lookup(&self, path: &str) -> Option<&MethodTable> {
        if let Some(table) = self.routes.get(path) {
            return Some(table);
        }
        self.routes
            .iter()
            .filter(|(pattern, _)| pattern.ends_with('/') && path.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, table)| table)
    }
}

impl Route {
    fn top_level<H>(handler: H) -> Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        Self { handler: boxed(handler), scope: Arc::default() }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

fn not_found(ctx: &mut Context<'_>) {
    ctx.text(StatusCode::NOT_FOUND, "404 page not found\n");
}

// ── Group ─────────────────────────────────────────────────────────────────────

/// A registration scope under a path prefix, opened with [`Router::group`].
///
/// The group borrows the router for as long as it is open, so nothing can be
/// registered on an enclosing scope while a nested one is being built. Its
/// routes keep the view of enclosing middleware taken when it was opened.
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    scope: Arc<Scope>,
}

impl Group<'_> {
    /// Full path prefix of this group, including every enclosing group.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Register middleware for every path under this group's prefix. It runs
    /// after middleware registered on enclosing scopes.
    pub fn use_middleware<M>(&mut self, middleware: M) -> &mut Self
    where
        M: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.router.middleware.register(&self.prefix, boxed(middleware));
        self
    }

    /// See [`Router::on`].
    pub fn on<H>(&mut self, method: Method, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        let path = self.path(path);
        let route = self.route(handler);
        self.router.insert(Some(method), path, route);
        self
    }

    /// See [`Router::any`].
    pub fn any<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        let path = self.path(path);
        let route = self.route(handler);
        self.router.insert(None, path, route);
        self
    }

    pub fn get<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::GET, path, handler)
    }

    pub fn post<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::POST, path, handler)
    }

    pub fn put<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::DELETE, path, handler)
    }

    pub fn head<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::HEAD, path, handler)
    }

    pub fn options<H>(&mut self, path: &str, handler: H) -> &mut Self
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        self.on(Method::OPTIONS, path, handler)
    }

    /// Open a nested scope. Its prefix is this group's prefix joined with
    /// `prefix`; it sees this group's middleware as registered so far.
    pub fn group<F>(&mut self, prefix: &str, build: F) -> &mut Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let prefix = self.path(prefix);
        let scope = self.router.middleware.open_scope(&self.scope, &self.prefix, &prefix);
        let mut child = Group { router: &mut *self.router, prefix, scope: Arc::new(scope) };
        build(&mut child);
        self
    }

    fn path(&self, path: &str) -> String {
        format!("{}{path}", self.prefix)
    }

    fn route<H>(&self, handler: H) -> Route
    where
        H: Fn(&mut Context<'_>) + Send + Sync + 'static,
    {
        Route { handler: boxed(handler), scope: Arc::clone(&self.scope) }
    }
}
