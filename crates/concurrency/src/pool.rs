//! Worker thread pools
//!
//! A pool keeps up to `core_size` long-lived workers. When every core worker
//! is busy, submissions are offered to the pool's [`WorkQueue`]; when the
//! queue refuses, overflow workers are started up to `maximum_size`. Overflow
//! workers exit after sitting idle for `keep_alive`.

use crate::queue::{Job, WorkQueue};
use crate::work::{UnitOfWork, WorkResult};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use strand_errors::{ConcurrencyError, Error, TaskError};
use strand_types::{ThreadPoolKey, ThreadPoolSizing};
use tracing::{debug, trace, warn};

/// Pool of named worker threads executing units of work
///
/// Dropping the pool stops intake; queued work still drains on the workers.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    key: ThreadPoolKey,
    core_size: usize,
    maximum_size: usize,
    keep_alive: Duration,
    rejection_threshold: Option<usize>,
    // None once the pool is shut down
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    live_workers: AtomicUsize,
    started_workers: AtomicUsize,
    completed: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Debug, Clone, Copy)]
enum WorkerKind {
    Core,
    Overflow,
}

impl ThreadPool {
    /// Create a pool over an existing queue
    ///
    /// The sizing is taken literally; policy such as collapsing
    /// `maximum_size` onto `core_size` belongs to the concurrency strategy.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyError::InvalidSizing` if `maximum_size` is zero or
    /// smaller than `core_size`.
    pub fn new(
        key: ThreadPoolKey,
        sizing: &ThreadPoolSizing,
        queue: WorkQueue,
    ) -> Result<Self, Error> {
        if sizing.maximum_size == 0 {
            return Err(ConcurrencyError::InvalidSizing {
                pool: key.to_string(),
                message: "maximum_size must be at least 1".to_string(),
            }
            .into());
        }
        if sizing.core_size > sizing.maximum_size {
            return Err(ConcurrencyError::InvalidSizing {
                pool: key.to_string(),
                message: format!(
                    "core_size {} exceeds maximum_size {}",
                    sizing.core_size, sizing.maximum_size
                ),
            }
            .into());
        }

        let rejection_threshold =
            (!queue.is_synchronous()).then_some(sizing.queue_size_rejection_threshold);

        debug!(
            pool = %key,
            core_size = sizing.core_size,
            maximum_size = sizing.maximum_size,
            queue_capacity = queue.capacity(),
            "created thread pool"
        );

        let WorkQueue {
            sender, receiver, ..
        } = queue;

        Ok(Self {
            inner: Arc::new(PoolInner {
                key,
                core_size: sizing.core_size,
                maximum_size: sizing.maximum_size,
                keep_alive: sizing.keep_alive,
                rejection_threshold,
                sender: Mutex::new(Some(sender)),
                receiver,
                live_workers: AtomicUsize::new(0),
                started_workers: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                workers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Submit a unit of work for execution on a worker thread
    ///
    /// The unit runs exactly as given; callers that want context propagation
    /// pass it through [`crate::ConcurrencyStrategy::wrap_unit_of_work`]
    /// first. A panic inside the unit is reported as `TaskError::Panicked`
    /// and does not take the worker down.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyError::Rejected` when every worker is busy and the
    /// queue cannot take the job, `ConcurrencyError::ShutDown` after
    /// [`ThreadPool::shutdown`], or `ConcurrencyError::SpawnFailed` if the OS
    /// refuses a new thread.
    pub fn submit<T>(&self, work: UnitOfWork<T>) -> Result<TaskHandle<T>, Error>
    where
        T: Send + 'static,
    {
        let (result_tx, result_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(move || work.call()))
                .unwrap_or_else(|payload| {
                    Err(TaskError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });
            // The caller may have dropped its handle
            let _ = result_tx.send(outcome);
        });

        self.inner.execute(job)?;
        Ok(TaskHandle {
            receiver: result_rx,
        })
    }

    /// Stop accepting work; queued jobs still run
    pub fn shutdown(&self) {
        let previous = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if previous.is_some() {
            debug!(pool = %self.inner.key, "thread pool shutting down");
        }
    }

    /// Shut down and block until every worker thread has exited
    ///
    /// Must not be called from one of this pool's own workers.
    pub fn await_termination(&self) {
        self.shutdown();
        loop {
            let handles = std::mem::take(
                &mut *self
                    .inner
                    .workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    warn!(pool = %self.inner.key, "worker thread panicked outside a task");
                }
            }
        }
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    #[must_use]
    pub fn key(&self) -> &ThreadPoolKey {
        &self.inner.key
    }

    #[must_use]
    pub fn core_size(&self) -> usize {
        self.inner.core_size
    }

    #[must_use]
    pub fn maximum_size(&self) -> usize {
        self.inner.maximum_size
    }

    /// Worker threads currently alive
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::Acquire)
    }

    /// Jobs waiting in the queue
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.receiver.len()
    }

    #[must_use]
    pub fn completed_tasks(&self) -> u64 {
        self.inner.completed.load(Ordering::Acquire)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("key", &self.inner.key)
            .field("core_size", &self.inner.core_size)
            .field("maximum_size", &self.inner.maximum_size)
            .field("live_workers", &self.live_workers())
            .field("queued", &self.queued())
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    fn execute(self: &Arc<Self>, job: Job) -> Result<(), Error> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| self.shut_down())?;

        if self.try_reserve_worker(self.core_size) {
            return self.spawn_worker(Some(job), WorkerKind::Core);
        }

        if let Some(threshold) = self.rejection_threshold {
            if self.receiver.len() >= threshold {
                return Err(self.rejected("queue size rejection threshold reached"));
            }
        }

        match sender.try_send(job) {
            // With no core workers the queue would otherwise never drain
            Ok(()) if self.try_reserve_worker_if_idle() => {
                self.spawn_worker(None, WorkerKind::Overflow)
            }
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                if self.try_reserve_worker(self.maximum_size) {
                    self.spawn_worker(Some(job), WorkerKind::Overflow)
                } else {
                    Err(self.rejected("all workers busy and queue full"))
                }
            }
            Err(TrySendError::Disconnected(_)) => Err(self.shut_down()),
        }
    }

    fn try_reserve_worker(&self, limit: usize) -> bool {
        self.live_workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .is_ok()
    }

    fn try_reserve_worker_if_idle(&self) -> bool {
        self.live_workers
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn spawn_worker(self: &Arc<Self>, first: Option<Job>, kind: WorkerKind) -> Result<(), Error> {
        let n = self.started_workers.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("strand-{}-{n}", self.key);
        let inner = Arc::clone(self);

        match thread::Builder::new()
            .name(name.clone())
            .spawn(move || inner.run_worker(first, kind))
        {
            Ok(handle) => {
                let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
                trace!(pool = %self.key, worker = %name, ?kind, "started worker");
                Ok(())
            }
            Err(e) => {
                self.live_workers.fetch_sub(1, Ordering::AcqRel);
                Err(ConcurrencyError::SpawnFailed {
                    pool: self.key.to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        }
    }

    fn run_worker(&self, first: Option<Job>, kind: WorkerKind) {
        if let Some(first) = first {
            self.run_job(first);
        }
        loop {
            let next = match kind {
                WorkerKind::Core => self.receiver.recv().ok(),
                WorkerKind::Overflow => match self.receiver.recv_timeout(self.keep_alive) {
                    Ok(job) => Some(job),
                    Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
                },
            };
            let Some(job) = next else {
                break;
            };
            self.run_job(job);
        }
        self.live_workers.fetch_sub(1, Ordering::AcqRel);
        trace!(pool = %self.key, ?kind, "worker exiting");
    }

    fn run_job(&self, job: Job) {
        job();
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    fn rejected(&self, reason: &str) -> Error {
        warn!(pool = %self.key, reason, "rejected task");
        ConcurrencyError::Rejected {
            pool: self.key.to_string(),
            reason: reason.to_string(),
        }
        .into()
    }

    fn shut_down(&self) -> Error {
        ConcurrencyError::ShutDown {
            pool: self.key.to_string(),
        }
        .into()
    }
}

/// Handle to the eventual result of a submitted unit of work
pub struct TaskHandle<T> {
    receiver: Receiver<WorkResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Block until the unit of work finishes
    ///
    /// # Errors
    ///
    /// Returns the unit's own failure unchanged, `TaskError::Panicked` if it
    /// panicked, or `TaskError::Abandoned` if the job was discarded before any
    /// worker ran it.
    pub fn join(self) -> WorkResult<T> {
        self.receiver.recv().unwrap_or(Err(TaskError::Abandoned))
    }

    /// Wait up to `timeout` for the result, taking it if it arrives
    ///
    /// Returns `None` on timeout; the handle can then be waited on again.
    pub fn join_timeout(&self, timeout: Duration) -> Option<WorkResult<T>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Abandoned)),
        }
    }

    /// Whether a result is ready to be taken without blocking
    #[must_use]
    pub fn is_finished(&self) -> bool {
        !self.receiver.is_empty()
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn pool(sizing: &ThreadPoolSizing) -> ThreadPool {
        ThreadPool::new(
            ThreadPoolKey::new("test"),
            sizing,
            WorkQueue::new(sizing.max_queue_size),
        )
        .unwrap()
    }

    #[test]
    fn test_runs_on_named_worker() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        let handle = pool
            .submit(UnitOfWork::from_fn(|| {
                thread::current().name().map(str::to_string)
            }))
            .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("strand-test-1"));
        pool.await_termination();
    }

    #[test]
    fn test_failure_reaches_caller_unchanged() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        let handle = pool
            .submit(UnitOfWork::<u8>::new(|| Err(TaskError::failed("bad input"))))
            .unwrap();
        assert_eq!(handle.join(), Err(TaskError::failed("bad input")));
    }

    #[test]
    fn test_panic_is_captured_and_worker_survives() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        let handle = pool
            .submit(UnitOfWork::<()>::from_fn(|| panic!("kaboom")))
            .unwrap();
        assert_eq!(
            handle.join(),
            Err(TaskError::Panicked {
                message: "kaboom".to_string()
            })
        );

        // The same single worker must still serve requests
        let mut result = None;
        for _ in 0..100 {
            match pool.submit(UnitOfWork::from_fn(|| 7)) {
                Ok(handle) => {
                    result = Some(handle.join());
                    break;
                }
                Err(_) => thread::sleep(Duration::from_millis(5)),
            }
        }
        assert_eq!(result, Some(Ok(7)));
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_synchronous_queue_rejects_when_saturated() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let busy = pool
            .submit(UnitOfWork::from_fn(move || {
                worker_gate.wait();
            }))
            .unwrap();

        let err = pool.submit(UnitOfWork::from_fn(|| ())).unwrap_err();
        assert!(matches!(
            err,
            Error::Concurrency(ConcurrencyError::Rejected { .. })
        ));

        gate.wait();
        busy.join().unwrap();
    }

    #[test]
    fn test_bounded_queue_applies_rejection_threshold() {
        let sizing = ThreadPoolSizing::fixed(1).with_queue(10, 1);
        let pool = pool(&sizing);
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let busy = pool
            .submit(UnitOfWork::from_fn(move || {
                worker_gate.wait();
            }))
            .unwrap();

        let queued = pool.submit(UnitOfWork::from_fn(|| 1)).unwrap();
        assert_eq!(pool.queued(), 1);
        assert!(pool.submit(UnitOfWork::from_fn(|| 2)).is_err());

        gate.wait();
        busy.join().unwrap();
        assert_eq!(queued.join(), Ok(1));
    }

    #[test]
    fn test_overflow_worker_started_up_to_maximum() {
        let sizing = ThreadPoolSizing::fixed(1)
            .with_maximum(2)
            .with_keep_alive(Duration::from_millis(50));
        let pool = pool(&sizing);
        let gate = Arc::new(Barrier::new(3));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                pool.submit(UnitOfWork::from_fn(move || {
                    gate.wait();
                }))
                .unwrap()
            })
            .collect();
        assert_eq!(pool.live_workers(), 2);
        assert!(pool.submit(UnitOfWork::from_fn(|| ())).is_err());

        gate.wait();
        for handle in handles {
            handle.join().unwrap();
        }

        // The overflow worker retires after its keep-alive
        for _ in 0..100 {
            if pool.live_workers() == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        pool.shutdown();
        assert!(pool.is_shutdown());
        let err = pool.submit(UnitOfWork::from_fn(|| ())).unwrap_err();
        assert!(matches!(
            err,
            Error::Concurrency(ConcurrencyError::ShutDown { .. })
        ));
    }

    #[test]
    fn test_queued_work_drains_after_shutdown() {
        let sizing = ThreadPoolSizing::fixed(1).with_queue(4, 4);
        let pool = pool(&sizing);
        let handles: Vec<_> = (0..3)
            .map(|i| pool.submit(UnitOfWork::from_fn(move || i)).unwrap())
            .collect();
        pool.await_termination();
        let results: Vec<_> = handles.into_iter().map(TaskHandle::join).collect();
        assert_eq!(results, vec![Ok(0), Ok(1), Ok(2)]);
        assert_eq!(pool.completed_tasks(), 3);
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_invalid_sizing() {
        let mut sizing = ThreadPoolSizing::fixed(0);
        sizing.maximum_size = 0;
        let result = ThreadPool::new(ThreadPoolKey::new("empty"), &sizing, WorkQueue::new(0));
        assert!(matches!(
            result,
            Err(Error::Concurrency(ConcurrencyError::InvalidSizing { .. }))
        ));
    }

    #[test]
    fn test_join_timeout_waits_for_blocked_unit() {
        let pool = pool(&ThreadPoolSizing::fixed(1));
        let gate = Arc::new(Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let handle = pool
            .submit(UnitOfWork::from_fn(move || {
                worker_gate.wait();
                "released"
            }))
            .unwrap();

        assert_eq!(handle.join_timeout(Duration::from_millis(20)), None);
        assert!(!handle.is_finished());

        gate.wait();
        assert_eq!(
            handle.join_timeout(Duration::from_secs(5)),
            Some(Ok("released"))
        );
    }

    #[test]
    fn test_discarded_job_is_abandoned() {
        let (result_tx, result_rx) = channel::bounded::<WorkResult<u8>>(1);
        let handle = TaskHandle {
            receiver: result_rx.clone(),
        };
        let waiting = TaskHandle {
            receiver: result_rx,
        };
        drop(result_tx);

        assert_eq!(
            waiting.join_timeout(Duration::from_millis(10)),
            Some(Err(TaskError::Abandoned))
        );
        assert_eq!(handle.join(), Err(TaskError::Abandoned));
    }

    #[test]
    fn test_pool_without_core_workers_still_drains_queue() {
        let sizing = ThreadPoolSizing::fixed(0)
            .with_maximum(1)
            .with_queue(4, 4)
            .with_keep_alive(Duration::from_millis(50));
        let pool = pool(&sizing);

        let handle = pool.submit(UnitOfWork::from_fn(|| 3)).unwrap();
        assert_eq!(handle.join_timeout(Duration::from_secs(5)), Some(Ok(3)));
        pool.await_termination();
        assert_eq!(pool.live_workers(), 0);
    }
}
