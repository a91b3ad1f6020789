//! Per-thread trace context slot

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

thread_local! {
    static CURRENT: Cell<Option<TraceContext>> = const { Cell::new(None) };
}

/// Identifiers correlating work that belongs to one trace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub trace_id: Uuid,
    pub span_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub sampled: bool,
}

impl TraceContext {
    /// Start a new trace
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            span_id: Uuid::new_v4(),
            parent_id: None,
            sampled: true,
        }
    }

    /// New span in the same trace, parented to this one
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: Uuid::new_v4(),
            parent_id: Some(self.span_id),
            sampled: self.sampled,
        }
    }

    /// Context active on the current thread
    #[must_use]
    pub fn current() -> Option<Self> {
        current()
    }

    /// Make this the current thread's context until the scope drops
    pub fn attach(self) -> ContextScope {
        install(Some(self))
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id.simple(), self.span_id.simple())
    }
}

/// Context active on the current thread
#[must_use]
pub fn current() -> Option<TraceContext> {
    CURRENT.with(Cell::get)
}

/// Set the current thread's context, `None` included, until the scope drops
pub fn install(context: Option<TraceContext>) -> ContextScope {
    let previous = CURRENT.with(|current| current.replace(context));
    ContextScope {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the context that was current before [`install`] when dropped,
/// including while unwinding
#[must_use = "the context is restored as soon as the scope is dropped"]
pub struct ContextScope {
    previous: Option<TraceContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.previous));
    }
}

impl fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScope")
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}
