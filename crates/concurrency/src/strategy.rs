//! The concurrency strategy seam and its default implementation

use crate::pool::ThreadPool;
use crate::queue::WorkQueue;
use crate::request::{RequestVariable, RequestVariableLifecycle};
use crate::work::UnitOfWork;
use strand_errors::Error;
use strand_types::{ThreadPoolKey, ThreadPoolSizing};
use tracing::warn;

/// Policy deciding how thread pools, queues and request variables are made,
/// and how units of work are prepared before they reach a worker
///
/// Every method has a default, so an implementation only overrides what it
/// changes. The trait uses generic methods and is therefore used through
/// static dispatch; decorators hold their inner strategy as a type parameter.
pub trait ConcurrencyStrategy: Send + Sync {
    /// Create a pool for `key`, building its queue with [`Self::create_queue`]
    ///
    /// # Errors
    ///
    /// Returns an error if the sizing is invalid or a worker cannot be set up.
    fn create_thread_pool(
        &self,
        key: &ThreadPoolKey,
        sizing: &ThreadPoolSizing,
    ) -> Result<ThreadPool, Error> {
        let queue = self.create_queue(sizing.max_queue_size);
        self.create_thread_pool_with_queue(key, sizing, queue)
    }

    /// Create a pool for `key` over a caller-supplied queue
    ///
    /// # Errors
    ///
    /// Returns an error if the sizing is invalid.
    fn create_thread_pool_with_queue(
        &self,
        key: &ThreadPoolKey,
        sizing: &ThreadPoolSizing,
        queue: WorkQueue,
    ) -> Result<ThreadPool, Error> {
        ThreadPool::new(key.clone(), &effective_sizing(key, sizing), queue)
    }

    /// Create a queue; `0` gives a synchronous hand-off
    fn create_queue(&self, max_queue_size: usize) -> WorkQueue {
        WorkQueue::new(max_queue_size)
    }

    /// Prepare a unit of work before it is handed to a worker thread
    fn wrap_unit_of_work<T>(&self, work: UnitOfWork<T>) -> UnitOfWork<T>
    where
        T: Send + 'static,
    {
        wrap_unit_of_work_default(work)
    }

    /// Create a request-scoped variable
    fn create_request_variable<T, L>(&self, lifecycle: L) -> RequestVariable<T>
    where
        T: Clone + Send + Sync + 'static,
        L: RequestVariableLifecycle<T> + 'static,
    {
        RequestVariable::new(lifecycle)
    }
}

/// Base-level unit-of-work wrapping every strategy starts from (identity)
///
/// Overriding strategies call this where they would otherwise fall back to
/// the trait's default behavior.
#[must_use]
pub fn wrap_unit_of_work_default<T>(work: UnitOfWork<T>) -> UnitOfWork<T> {
    work
}

/// Strategy using every default unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConcurrencyStrategy;

impl ConcurrencyStrategy for DefaultConcurrencyStrategy {}

/// Collapse the requested sizing to what the pool will actually run
///
/// Unless divergence is allowed, a pool never grows past `core_size`.
fn effective_sizing(key: &ThreadPoolKey, sizing: &ThreadPoolSizing) -> ThreadPoolSizing {
    let mut effective = sizing.clone();
    if !sizing.allow_maximum_size_to_diverge_from_core_size {
        effective.maximum_size = sizing.core_size;
    } else if sizing.core_size > sizing.maximum_size {
        warn!(
            pool = %key,
            core_size = sizing.core_size,
            maximum_size = sizing.maximum_size,
            "core_size exceeds maximum_size, using core_size for both"
        );
        effective.maximum_size = sizing.core_size;
    }
    effective
}
