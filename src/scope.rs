//! Request-scoped state shared by the filters of one pipeline run.

use std::ops::{Deref, DerefMut};

use crate::log::Correlation;
use crate::metadata::Metadata;
use crate::trace::{NoopTracer, Tracer};

/// Everything that lives exactly as long as one inbound request.
///
/// A hosting runtime creates one `Scope` per request and passes it by
/// `&mut` through the pipeline. Never share one across concurrent requests.
pub struct Scope {
    pub metadata: Metadata,
    pub tracer: Box<dyn Tracer>,
    /// Debug mode forces full detail capture for this request.
    pub debug: bool,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

impl Scope {
    pub fn new(tracer: Box<dyn Tracer>) -> Self {
        Self { metadata: Metadata::new(), tracer, debug: false, request_id: None, trace_id: None }
    }

    /// Ids for log records.
    pub fn correlation(&self) -> Correlation<'_> {
        Correlation {
            trace_id: self.trace_id.as_deref().unwrap_or_default(),
            request_id: self.request_id.as_deref().unwrap_or_default(),
        }
    }

    /// End-of-request cleanup: flushes the tracer and resets all state.
    pub fn finish(&mut self) {
        self.tracer.flush();
        self.metadata.clear();
        self.debug = false;
        self.request_id = None;
        self.trace_id = None;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(Box::new(NoopTracer::new()))
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("metadata", &self.metadata)
            .field("debug", &self.debug)
            .field("request_id", &self.request_id)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

/// Calls [`Scope::finish`] when dropped, on every exit path.
pub(crate) struct ScopeGuard<'a>(&'a mut Scope);

impl<'a> ScopeGuard<'a> {
    pub(crate) fn new(scope: &'a mut Scope) -> Self {
        Self(scope)
    }
}

impl Deref for ScopeGuard<'_> {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        self.0
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Scope {
        self.0
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn finish_resets_everything() {
        let mut scope = Scope::default();
        scope.metadata.set("x-md-global-shard", "7");
        scope.debug = true;
        scope.request_id = Some("r-1".into());
        scope.tracer.start_span("a", None, SystemTime::now());

        scope.finish();

        assert!(scope.metadata.is_empty());
        assert!(!scope.debug);
        assert_eq!(scope.correlation(), Correlation::default());
        assert!(scope.tracer.root_span().is_none());
    }

    #[test]
    fn guard_finishes_even_on_panic() {
        let mut scope = Scope::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = ScopeGuard::new(&mut scope);
            guard.metadata.set("k", "v");
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(scope.metadata.is_empty());
    }
}
