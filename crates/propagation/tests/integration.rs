//! Integration tests for trace context propagation through strategies

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use strand_concurrency::*;
    use strand_errors::{Error, TaskError};
    use strand_propagation::*;
    use strand_types::{ThreadPoolKey, ThreadPoolSizing};

    /// Propagator spy counting wraps, installs and clears
    #[derive(Default)]
    struct SpyPropagator {
        wraps: AtomicUsize,
        installs: Arc<AtomicUsize>,
        clears: Arc<AtomicUsize>,
    }

    struct ClearOnDrop(Arc<AtomicUsize>);

    impl Drop for ClearOnDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ContextPropagator for SpyPropagator {
        fn wrap<T>(&self, task: Task<T>) -> Task<T>
        where
            T: Send + 'static,
        {
            self.wraps.fetch_add(1, Ordering::SeqCst);
            let installs = Arc::clone(&self.installs);
            let clears = Arc::clone(&self.clears);
            let inner = TracingPropagator.wrap(task);
            Box::new(move || {
                installs.fetch_add(1, Ordering::SeqCst);
                let _clear = ClearOnDrop(clears);
                inner()
            })
        }
    }

    impl SpyPropagator {
        fn counts(&self) -> (usize, usize, usize) {
            (
                self.wraps.load(Ordering::SeqCst),
                self.installs.load(Ordering::SeqCst),
                self.clears.load(Ordering::SeqCst),
            )
        }
    }

    /// Delegate recording every forwarded call
    #[derive(Default)]
    struct RecordingStrategy {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingStrategy {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ConcurrencyStrategy for RecordingStrategy {
        fn create_thread_pool(
            &self,
            key: &ThreadPoolKey,
            sizing: &ThreadPoolSizing,
        ) -> Result<ThreadPool, Error> {
            self.record(format!("pool {key} core={}", sizing.core_size));
            ThreadPool::new(key.clone(), sizing, WorkQueue::new(sizing.max_queue_size))
        }

        fn create_thread_pool_with_queue(
            &self,
            key: &ThreadPoolKey,
            sizing: &ThreadPoolSizing,
            queue: WorkQueue,
        ) -> Result<ThreadPool, Error> {
            self.record(format!("pool+queue {key} capacity={}", queue.capacity()));
            ThreadPool::new(key.clone(), sizing, queue)
        }

        fn create_queue(&self, max_queue_size: usize) -> WorkQueue {
            self.record(format!("queue {max_queue_size}"));
            WorkQueue::new(max_queue_size)
        }

        fn wrap_unit_of_work<T>(&self, work: UnitOfWork<T>) -> UnitOfWork<T>
        where
            T: Send + 'static,
        {
            self.record("wrap".to_string());
            work
        }

        fn create_request_variable<T, L>(&self, lifecycle: L) -> RequestVariable<T>
        where
            T: Clone + Send + Sync + 'static,
            L: RequestVariableLifecycle<T> + 'static,
        {
            self.record("request variable".to_string());
            RequestVariable::new(lifecycle)
        }
    }

    fn spy_strategy() -> (Arc<SpyPropagator>, PropagatingConcurrencyStrategy<SpyPropagator>) {
        let spy = Arc::new(SpyPropagator::default());
        let strategy = PropagatingConcurrencyStrategy::new(Arc::clone(&spy));
        (spy, strategy)
    }

    #[test]
    fn test_wrapping_twice_wraps_once() {
        let (spy, strategy) = spy_strategy();

        let once = strategy.wrap_unit_of_work(UnitOfWork::from_fn(|| 5));
        assert!(once.is_propagated());
        let twice = strategy.wrap_unit_of_work(once);
        assert!(twice.is_propagated());

        assert_eq!(twice.call(), Ok(5));
        assert_eq!(spy.counts(), (1, 1, 1));
    }

    #[test]
    fn test_context_arrives_on_worker_thread() {
        let strategy = PropagatingConcurrencyStrategy::new(Arc::new(TracingPropagator));
        let pool = strategy
            .create_thread_pool(&ThreadPoolKey::new("orders"), &ThreadPoolSizing::fixed(1))
            .unwrap();

        let root = TraceContext::new_root();
        let work = {
            let _scope = root.attach();
            strategy.wrap_unit_of_work(UnitOfWork::from_fn(|| {
                (
                    TraceContext::current(),
                    std::thread::current().name().map(str::to_string),
                )
            }))
        };

        let (seen, thread) = pool.submit(work).unwrap().join().unwrap();
        assert_eq!(seen, Some(root));
        assert_eq!(thread.as_deref(), Some("strand-orders-1"));

        // The worker's slot is restored once the unit finishes
        let mut after = None;
        for _ in 0..100 {
            if let Ok(handle) = pool.submit(UnitOfWork::from_fn(TraceContext::current)) {
                after = Some(handle.join());
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(after, Some(Ok(None)));
        pool.await_termination();
    }

    #[test]
    fn test_context_captured_at_wrap_time_not_submit_time() {
        let strategy = PropagatingConcurrencyStrategy::new(Arc::new(TracingPropagator));
        let pool = strategy
            .create_thread_pool(&ThreadPoolKey::new("capture"), &ThreadPoolSizing::fixed(1))
            .unwrap();

        let first = TraceContext::new_root();
        let first_scope = first.attach();
        let work = strategy.wrap_unit_of_work(UnitOfWork::from_fn(TraceContext::current));
        drop(first_scope);

        let _second = TraceContext::new_root().attach();
        assert_eq!(pool.submit(work).unwrap().join(), Ok(Some(first)));
    }

    #[test]
    fn test_failure_propagates_and_context_is_cleared() {
        let (spy, strategy) = spy_strategy();
        let pool = strategy
            .create_thread_pool(&ThreadPoolKey::new("failing"), &ThreadPoolSizing::fixed(1))
            .unwrap();

        let _scope = TraceContext::new_root().attach();
        let work = strategy
            .wrap_unit_of_work(UnitOfWork::<u32>::new(|| Err(TaskError::failed("card declined"))));
        let result = pool.submit(work).unwrap().join();

        assert_eq!(result, Err(TaskError::failed("card declined")));
        assert_eq!(spy.counts(), (1, 1, 1));
    }

    #[test]
    fn test_panic_still_clears_context() {
        let (spy, strategy) = spy_strategy();
        let pool = strategy
            .create_thread_pool(&ThreadPoolKey::new("panicking"), &ThreadPoolSizing::fixed(1))
            .unwrap();

        let work = strategy.wrap_unit_of_work(UnitOfWork::<()>::from_fn(|| panic!("bug")));
        let result = pool.submit(work).unwrap().join();

        assert!(matches!(result, Err(TaskError::Panicked { .. })));
        assert_eq!(spy.counts(), (1, 1, 1));
    }

    #[test]
    fn test_empty_submitter_context_hides_worker_context() {
        let strategy = PropagatingConcurrencyStrategy::new(Arc::new(TracingPropagator));
        let work = strategy.wrap_unit_of_work(UnitOfWork::from_fn(TraceContext::current));

        let worker_context = TraceContext::new_root();
        let (during, after) = std::thread::spawn(move || {
            let _stale = worker_context.attach();
            let during = work.call();
            (during, TraceContext::current())
        })
        .join()
        .unwrap();

        assert_eq!(during, Ok(None));
        assert_eq!(after, Some(worker_context));
    }

    #[test]
    fn test_forwards_to_delegate_unchanged() {
        let delegate = Arc::new(RecordingStrategy::default());
        let strategy = PropagatingConcurrencyStrategy::with_delegate(
            Arc::new(TracingPropagator),
            Arc::clone(&delegate),
        );

        let key = ThreadPoolKey::new("forwarded");
        let sizing = ThreadPoolSizing::fixed(3).with_queue(7, 7);
        let pool = strategy.create_thread_pool(&key, &sizing).unwrap();
        assert_eq!(pool.key(), &key);
        assert_eq!(pool.core_size(), 3);

        let queue = strategy.create_queue(4);
        assert_eq!(queue.capacity(), 4);

        let explicit = strategy
            .create_thread_pool_with_queue(&key, &sizing, WorkQueue::new(2))
            .unwrap();
        assert_eq!(explicit.maximum_size(), 3);

        let variable = strategy.create_request_variable(|| 11_u64);
        let _request = RequestScope::enter();
        assert_eq!(variable.get().unwrap(), 11);

        // Wrapping is handled by the decorator itself
        let _ = strategy.wrap_unit_of_work(UnitOfWork::from_fn(|| ()));

        assert_eq!(
            delegate.calls(),
            vec![
                "pool forwarded core=3".to_string(),
                "queue 4".to_string(),
                "pool+queue forwarded capacity=2".to_string(),
                "request variable".to_string(),
            ]
        );
    }

    #[test]
    fn test_default_delegate_when_omitted() {
        let strategy: PropagatingConcurrencyStrategy<TracingPropagator> =
            PropagatingConcurrencyStrategy::from_optional(Arc::new(TracingPropagator), None);
        let pool = strategy
            .create_thread_pool(&ThreadPoolKey::new("fallback"), &ThreadPoolSizing::default())
            .unwrap();

        assert_eq!(pool.core_size(), ThreadPoolSizing::DEFAULT_CORE_SIZE);
        assert_eq!(pool.maximum_size(), ThreadPoolSizing::DEFAULT_MAXIMUM_SIZE);
        let work = strategy.wrap_unit_of_work(UnitOfWork::from_fn(|| "ok"));
        assert_eq!(pool.submit(work).unwrap().join(), Ok("ok"));
    }

    #[test]
    fn test_stacked_decorators_capture_once() {
        let spy = Arc::new(SpyPropagator::default());
        let inner = Arc::new(PropagatingConcurrencyStrategy::new(Arc::clone(&spy)));
        let outer =
            PropagatingConcurrencyStrategy::with_delegate(Arc::clone(&spy), Arc::clone(&inner));
        let pool = outer
            .create_thread_pool(&ThreadPoolKey::new("stacked"), &ThreadPoolSizing::fixed(1))
            .unwrap();

        let root = TraceContext::new_root();
        let _scope = root.attach();

        // Outer layer alone
        let work = outer.wrap_unit_of_work(UnitOfWork::from_fn(TraceContext::current));
        assert_eq!(pool.submit(work).unwrap().join(), Ok(Some(root)));
        assert_eq!(spy.counts(), (1, 1, 1));

        // Both layers in sequence
        let work = inner.wrap_unit_of_work(UnitOfWork::from_fn(TraceContext::current));
        let work = outer.wrap_unit_of_work(work);
        assert_eq!(work.call(), Ok(Some(root)));
        assert_eq!(spy.counts(), (2, 2, 2));
    }

    proptest! {
        #[test]
        fn repeated_wrapping_is_idempotent(layers in 1usize..6, value in any::<i64>()) {
            let (spy, strategy) = spy_strategy();
            let mut work = UnitOfWork::from_fn(move || value);
            for _ in 0..layers {
                work = strategy.wrap_unit_of_work(work);
            }
            prop_assert!(work.is_propagated());
            prop_assert_eq!(work.call(), Ok(value));
            prop_assert_eq!(spy.counts(), (1, 1, 1));
        }
    }
}
