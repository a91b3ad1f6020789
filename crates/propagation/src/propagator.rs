//! Capturing context on one thread and restoring it on another

use crate::context::{self, TraceContext};
use strand_concurrency::Task;
use tracing::Span;

/// Collaborator that makes a task carry the submitting thread's context
pub trait ContextPropagator: Send + Sync {
    /// Capture the calling thread's context now and return a task that
    /// installs it, runs `task`, and restores the executing thread's previous
    /// context whether `task` succeeds, fails or panics
    fn wrap<T>(&self, task: Task<T>) -> Task<T>
    where
        T: Send + 'static;
}

/// Propagates the [`TraceContext`] slot and the current `tracing` span
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPropagator;

impl ContextPropagator for TracingPropagator {
    fn wrap<T>(&self, task: Task<T>) -> Task<T>
    where
        T: Send + 'static,
    {
        let captured = TraceContext::current();
        let span = Span::current();
        Box::new(move || {
            let _entered = span.enter();
            // Installed even when empty so nothing left on the worker leaks in
            let _scope = context::install(captured);
            task()
        })
    }
}
