//! Concurrency strategy decorator adding trace context propagation

use crate::propagator::ContextPropagator;
use std::fmt;
use std::sync::Arc;
use strand_concurrency::{
    wrap_unit_of_work_default, ConcurrencyStrategy, DefaultConcurrencyStrategy, RequestVariable,
    RequestVariableLifecycle, ThreadPool, UnitOfWork, WorkQueue,
};
use strand_errors::Error;
use strand_types::{ThreadPoolKey, ThreadPoolSizing};
use tracing::trace;

/// Strategy that forwards everything to `delegate` except unit-of-work
/// wrapping, where it makes each unit carry the submitter's trace context
///
/// A unit that already carries propagated context is returned untouched, so
/// stacking decorators or re-wrapping a resubmitted unit never captures and
/// restores the context twice.
pub struct PropagatingConcurrencyStrategy<P, S = DefaultConcurrencyStrategy> {
    delegate: Arc<S>,
    propagator: Arc<P>,
}

impl<P> PropagatingConcurrencyStrategy<P>
where
    P: ContextPropagator,
{
    /// Decorate a freshly constructed [`DefaultConcurrencyStrategy`]
    #[must_use]
    pub fn new(propagator: Arc<P>) -> Self {
        Self::from_optional(propagator, None)
    }
}

impl<P, S> PropagatingConcurrencyStrategy<P, S>
where
    P: ContextPropagator,
    S: ConcurrencyStrategy,
{
    /// Decorate an existing strategy
    #[must_use]
    pub fn with_delegate(propagator: Arc<P>, delegate: Arc<S>) -> Self {
        Self {
            delegate,
            propagator,
        }
    }

    /// Decorate `delegate`, or a default-constructed `S` when absent
    #[must_use]
    pub fn from_optional(propagator: Arc<P>, delegate: Option<Arc<S>>) -> Self
    where
        S: Default,
    {
        Self::with_delegate(propagator, delegate.unwrap_or_default())
    }

    #[must_use]
    pub fn delegate(&self) -> &Arc<S> {
        &self.delegate
    }

    #[must_use]
    pub fn propagator(&self) -> &Arc<P> {
        &self.propagator
    }
}

impl<P, S> ConcurrencyStrategy for PropagatingConcurrencyStrategy<P, S>
where
    P: ContextPropagator,
    S: ConcurrencyStrategy,
{
    fn create_thread_pool(
        &self,
        key: &ThreadPoolKey,
        sizing: &ThreadPoolSizing,
    ) -> Result<ThreadPool, Error> {
        self.delegate.create_thread_pool(key, sizing)
    }

    fn create_thread_pool_with_queue(
        &self,
        key: &ThreadPoolKey,
        sizing: &ThreadPoolSizing,
        queue: WorkQueue,
    ) -> Result<ThreadPool, Error> {
        self.delegate.create_thread_pool_with_queue(key, sizing, queue)
    }

    fn create_queue(&self, max_queue_size: usize) -> WorkQueue {
        self.delegate.create_queue(max_queue_size)
    }

    fn wrap_unit_of_work<T>(&self, work: UnitOfWork<T>) -> UnitOfWork<T>
    where
        T: Send + 'static,
    {
        let already_propagated = work.is_propagated();
        let wrapped = wrap_unit_of_work_default(work);
        if already_propagated {
            trace!("unit of work already carries trace context");
            return wrapped;
        }
        UnitOfWork::Propagated(self.propagator.wrap(wrapped.into_task()))
    }

    fn create_request_variable<T, L>(&self, lifecycle: L) -> RequestVariable<T>
    where
        T: Clone + Send + Sync + 'static,
        L: RequestVariableLifecycle<T> + 'static,
    {
        self.delegate.create_request_variable(lifecycle)
    }
}

impl<P, S> Clone for PropagatingConcurrencyStrategy<P, S> {
    fn clone(&self) -> Self {
        Self {
            delegate: Arc::clone(&self.delegate),
            propagator: Arc::clone(&self.propagator),
        }
    }
}

impl<P, S> fmt::Debug for PropagatingConcurrencyStrategy<P, S>
where
    P: fmt::Debug,
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropagatingConcurrencyStrategy")
            .field("delegate", &self.delegate)
            .field("propagator", &self.propagator)
            .finish()
    }
}
