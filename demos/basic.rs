//! Minimal strand demo: global middleware, a scoped group, and a handler
//! that panics on purpose.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X DELETE http://localhost:3000/users/42       # 404, GET only
//!   curl -i http://localhost:3000/admin/stats              # 401
//!   curl -i -H 'authorization: Bearer alice' http://localhost:3000/admin/stats
//!   curl -i http://localhost:3000/boom                     # 500, server keeps running

use http::StatusCode;
use strand::{Context, Router, Server};

#[tokio::main]
async fn main() -> Result<(), strand::Error> {
    tracing_subscriber::fmt::init();

    let app = Router::with_defaults()
        .get("/users/", get_user)
        .post("/users", create_user)
        .get("/boom", boom)
        .group("/admin", |admin| {
            admin.use_middleware(require_token).get("/stats", stats);
        });

    Server::bind("0.0.0.0:3000").serve(app).await
}

// GET /users/{anything}: subtree route, the id is the rest of the path.
fn get_user(c: &mut Context) {
    let id = c.path().trim_start_matches("/users/").to_owned();
    c.json(StatusCode::OK, format!(r#"{{"id":"{id}","name":"alice"}}"#));
}

// POST /users
//
// c.body() is &[u8]; parse with serde_json::from_slice or anything else.
fn create_user(c: &mut Context) {
    if c.body().is_empty() {
        c.abort_with_status(StatusCode::BAD_REQUEST);
        return;
    }
    c.set_header("location", "/users/99");
    c.json(StatusCode::CREATED, r#"{"id":"99","name":"new_user"}"#);
}

fn boom(_c: &mut Context) {
    panic!("this is a test panic");
}

fn require_token(c: &mut Context) {
    let Some(user) = c.header("authorization").map(|v| v.trim_start_matches("Bearer ").to_owned()) else {
        c.abort_with_status(StatusCode::UNAUTHORIZED);
        return;
    };
    c.set("user", user);
}

fn stats(c: &mut Context) {
    let user = c.get::<String>("user").cloned().unwrap_or_default();
    c.text(StatusCode::OK, format!("hello {user}, all systems nominal\n"));
}
