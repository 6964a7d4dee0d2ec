//! Panic isolation.
//!
//! [`recovery`] wraps everything downstream of it in a panic boundary. A
//! panic in a later middleware or in the route handler is caught there and
//! classified:
//!
//! | Payload | Result |
//! |---|---|
//! | `io::Error` saying the peer went away (`broken pipe`, `connection reset by peer`) | request hung up, nothing written |
//! | anything else | `error!` log with a stack dump, `500`, abort |
//!
//! Register it before anything that might panic. The chain has no boundary
//! of its own: a panic above `recovery`, or with no `recovery` at all,
//! reaches the host server.
//!
//! ```rust
//! use strand::{Router, middleware};
//!
//! let app = Router::new()
//!     .use_middleware(middleware::recovery)
//!     .get("/", |_| panic!("answered with a 500"));
//! ```
//!
//! # Stack traces
//!
//! By the time `catch_unwind` returns, the panicking frames are gone. To
//! report where the panic happened, the first call to [`recovery`] installs a
//! process-wide panic hook. While a thread is inside a boundary the hook
//! stashes the location and an unresolved backtrace instead of printing; on
//! every other thread it defers to the hook that was installed before.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::io;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};
use std::sync::Once;

use backtrace::Backtrace;
use http::StatusCode;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::Error;

/// Catch panics from the rest of the chain and turn them into a `500` or a
/// silent hang-up.
pub fn recovery(ctx: &mut Context<'_>) {
    install_hook();

    let result = {
        let _boundary = Boundary::enter();
        panic::catch_unwind(AssertUnwindSafe(|| ctx.next()))
    };

    let Err(payload) = result else { return };
    let captured = CAPTURED.with(|slot| slot.borrow_mut().take());

    if peer_disconnected(&*payload) {
        debug!(
            panic = %describe(&*payload),
            path = ctx.path(),
            "peer disconnected mid-response, hanging up"
        );
        ctx.hang_up();
        return;
    }

    let (location, stack) = match captured {
        Some(Captured { location, mut trace }) => {
            trace.resolve();
            (location, dump_stack(&trace))
        }
        None => (None, String::from("(no stack captured)\n")),
    };
    error!(
        panic = %describe(&*payload),
        location = location.as_deref().unwrap_or("unknown"),
        method = %ctx.method(),
        path = ctx.path(),
        "panic recovered\n{stack}"
    );
    ctx.abort_with_status(StatusCode::INTERNAL_SERVER_ERROR);
}

// ── Classification ────────────────────────────────────────────────────────────

const PEER_GONE: [&str; 2] = ["broken pipe", "connection reset by peer"];

/// True when the payload is a write failure caused by the client closing the
/// connection. Nothing can be sent to such a peer.
fn peer_disconnected(payload: &(dyn Any + Send)) -> bool {
    if let Some(err) = payload.downcast_ref::<io::Error>() {
        return io_peer_gone(err);
    }
    if let Some(Error::Io(err)) = payload.downcast_ref::<Error>() {
        return io_peer_gone(err);
    }
    false
}

fn io_peer_gone(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset) {
        return true;
    }
    let mut cause: Option<&dyn StdError> = Some(err);
    while let Some(e) = cause {
        let text = e.to_string().to_ascii_lowercase();
        if PEER_GONE.iter().any(|needle| text.contains(needle)) {
            return true;
        }
        cause = e.source();
    }
    false
}

fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<io::Error>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<Error>() {
        e.to_string()
    } else {
        String::from("Box<dyn Any>")
    }
}

// ── Panic hook ────────────────────────────────────────────────────────────────

struct Captured {
    location: Option<String>,
    trace: Backtrace,
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<Captured>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let location = info.location().map(|l| format!("{}:{}", l.file(), l.line()));
            let trace = Backtrace::new_unresolved();
            CAPTURED.with(|slot| *slot.borrow_mut() = Some(Captured { location, trace }));
        }));
    });
}

/// Marks the current thread as inside an isolation boundary for as long as
/// it lives. Boundaries nest.
struct Boundary;

impl Boundary {
    fn enter() -> Self {
        CAPTURED.with(|slot| *slot.borrow_mut() = None);
        DEPTH.with(|d| d.set(d.get() + 1));
        Self
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

// ── Stack dump ────────────────────────────────────────────────────────────────

/// Render a resolved backtrace, one frame per entry:
///
/// ```text
/// src/routes.rs:42 (0x55d0c0a1b2c3)
///     func: get_user::{{closure}}
/// ```
///
/// Frames belonging to the panic machinery itself are skipped.
fn dump_stack(trace: &Backtrace) -> String {
    let mut out = String::new();
    let mut in_machinery = true;
    for frame in trace.frames() {
        let ip = frame.ip() as usize;
        let symbols = frame.symbols();
        if symbols.is_empty() {
            if !in_machinery {
                let _ = writeln!(out, "??? (0x{ip:x})\n\tfunc: ???");
            }
            continue;
        }
        for symbol in symbols {
            let name = symbol.name().map(|n| format!("{n:#}"));
            if in_machinery && name.as_deref().is_some_and(is_machinery) {
                continue;
            }
            in_machinery = false;
            let file = symbol
                .filename()
                .map(|f| f.display().to_string())
                .unwrap_or_else(|| String::from("???"));
            let line = symbol.lineno().unwrap_or(0);
            let func = name.as_deref().map(simplify_function).unwrap_or("???");
            let _ = writeln!(out, "{file}:{line} (0x{ip:x})\n\tfunc: {func}");
        }
    }
    out
}

/// Symbols of the unwinding runtime and of this hook. Trait-impl frames
/// (`<Type as Trait>::method`) are matched on the implementing type.
fn is_machinery(name: &str) -> bool {
    const PREFIXES: [&str; 10] = [
        "backtrace::",
        "core::panicking",
        "std::panic",
        "std::rt::",
        "std::sys::backtrace::",
        "std::sys_common::backtrace::",
        "rust_begin_unwind",
        "__rustc::",
        "alloc::boxed::Box<",
        "strand::middleware::recovery::install_hook",
    ];
    let bare = name.trim_start_matches('<');
    PREFIXES.iter().any(|p| bare.starts_with(p))
}

/// Strip the crate and module path from a demangled symbol, keeping the item
/// name and any closure suffix.
///
/// `app::routes::get_user::{closure#0}` becomes `get_user::{closure#0}`;
/// the legacy `{{closure}}` spelling is kept the same way.
fn simplify_function(name: &str) -> &str {
    top_level_separators(name)
        .into_iter()
        .rev()
        .map(|at| at + 2)
        .find(|&start| !name[start..].starts_with('{'))
        .map_or(name, |start| &name[start..])
}

/// Byte offsets of `::` separators not nested inside `<…>`.
fn top_level_separators(name: &str) -> Vec<usize> {
    let bytes = name.as_bytes();
    let mut depth = 0usize;
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' => depth += 1,
            b'>' => depth = depth.saturating_sub(1),
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                found.push(i);
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}
