//! Path-prefix middleware index.
//!
//! Middleware is registered against a path prefix and applies to every path
//! at or beneath it. Resolution walks the request path one segment at a time:
//!
//! ```text
//! registered:  "/" → [A]    "/test" → [B]    "/test/demo" → [C, D]
//!
//! resolve("/test/demo/extra")  →  [A, B, C, D]
//! resolve("/tester")           →  [A]          ← segments, not string prefixes
//! ```
//!
//! Global middleware comes first, then each ancestor from root to leaf, each
//! level in registration order.
//!
//! A group sees its enclosing scopes as they were when it was opened. That
//! view is a [`Scope`]: for each enclosing prefix, how many entries of its
//! list were registered at the time. Lists stay append-only, so a length is
//! enough to replay the view later.

use std::collections::HashMap;

use crate::handler::BoxedHandler;

/// Registry of middleware keyed by canonical path prefix.
///
/// Built during registration, read-only while serving.
#[derive(Default)]
pub(crate) struct MiddlewareIndex {
    by_prefix: HashMap<String, Vec<BoxedHandler>>,
}

impl MiddlewareIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append `middleware` to the list at `prefix`. Registering the same
    /// prefix again appends; nothing is ever replaced.
    pub(crate) fn register(&mut self, prefix: &str, middleware: BoxedHandler) {
        self.by_prefix
            .entry(canonical_prefix(prefix))
            .or_default()
            .push(middleware);
    }

    /// The ordered chain that applies to `path`, as seen from `scope`.
    pub(crate) fn resolve(&self, path: &str, scope: &Scope) -> Vec<BoxedHandler> {
        let mut chain = Vec::new();
        self.extend_level(&mut chain, "/", scope);

        let mut prefix = String::with_capacity(path.len());
        for segment in path.split('/').skip(1).filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            self.extend_level(&mut chain, &prefix, scope);
        }
        chain
    }

    /// Record what a scope opened at `child` under `parent` can see: the
    /// parent's own view plus the parent's list as it stands now.
    pub(crate) fn open_scope(&self, parent: &Scope, parent_prefix: &str, child: &str) -> Scope {
        let mut scope = parent.clone();
        let parent_prefix = canonical_prefix(parent_prefix);
        if canonical_prefix(child) != parent_prefix {
            let seen = self.by_prefix.get(&parent_prefix).map_or(0, Vec::len);
            let limit = scope.limits.entry(parent_prefix).or_insert(seen);
            *limit = (*limit).min(seen);
        }
        scope
    }

    fn extend_level(&self, chain: &mut Vec<BoxedHandler>, prefix: &str, scope: &Scope) {
        let Some(level) = self.by_prefix.get(prefix) else { return };
        let visible = scope.limits.get(prefix).map_or(level.len(), |&n| n.min(level.len()));
        chain.extend(level[..visible].iter().cloned());
    }

    pub(crate) fn len(&self) -> usize {
        self.by_prefix.values().map(Vec::len).sum()
    }
}

/// A frozen view of enclosing prefixes, taken when a group is opened.
///
/// Prefixes without a limit are read in full. The default scope has no
/// limits and is what top-level routes and unmatched paths resolve with.
#[derive(Clone, Debug, Default)]
pub(crate) struct Scope {
    limits: HashMap<String, usize>,
}

/// `""`, `"/"` and `"//"` all mean the root; otherwise trailing slashes are
/// dropped so `/api/` and `/api` share one list.
fn canonical_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}
