//! Per-request access logging.

use std::time::Instant;

use tracing::{info, info_span};

use crate::context::Context;

/// Log one line per request with status, latency and peer, inside a span
/// carrying the method and path.
///
/// Runs the rest of the chain through [`Context::next`], so the status it
/// reports is whatever was written last downstream. A panic that unwinds
/// through it skips the log line; the recovery middleware logs those.
pub fn trace(ctx: &mut Context<'_>) {
    let span = info_span!("request", method = %ctx.method(), path = ctx.path());
    let _entered = span.enter();
    let begin = Instant::now();

    ctx.next();

    info!(
        status = ctx.status().as_u16(),
        latency = ?begin.elapsed(),
        peer = ?ctx.remote_addr(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::StatusCode;

    use super::*;
    use crate::context::Outcome;
    use crate::handler::boxed;
    use crate::response::BufferedResponse;

    #[test]
    fn passes_through_and_sees_downstream_status() {
        let request = http::Request::get("/teapot").body(Bytes::new()).unwrap().into();
        let mut response = BufferedResponse::new();
        let mut ctx = Context::new(
            request,
            &mut response,
            vec![boxed(trace)],
            boxed(|c| c.text(StatusCode::IM_A_TEAPOT, "short and stout")),
        );
        ctx.next();
        assert_eq!(ctx.outcome(), Outcome::Responded(StatusCode::IM_A_TEAPOT));
        drop(ctx);
        assert_eq!(response.body(), b"short and stout");
    }
}
