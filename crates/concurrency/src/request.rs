//! Request-scoped variables
//!
//! A request scope is entered on the thread serving a request. Variables
//! created through a concurrency strategy then hold one value per request,
//! created lazily from their lifecycle. When the outermost scope for a
//! request ends, every value stored for it is removed and handed back to its
//! lifecycle's `shutdown` hook.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock, Weak};
use strand_errors::{ConcurrencyError, Error};
use tracing::trace;
use uuid::Uuid;

thread_local! {
    static CURRENT_REQUEST: Cell<Option<RequestId>> = const { Cell::new(None) };
}

/// Open requests, across all threads
static SCOPES: LazyLock<DashMap<RequestId, ScopeEntry>> = LazyLock::new(DashMap::new);

#[derive(Default)]
struct ScopeEntry {
    // Guards currently open for the request, on any thread
    depth: usize,
    variables: Vec<Weak<dyn RequestValues>>,
}

/// Type-erased view of a variable's per-request storage
trait RequestValues: Send + Sync {
    fn release(&self, id: RequestId);
}

/// Identifier of one request scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Entry point for request scopes on the current thread
pub struct RequestScope;

impl RequestScope {
    /// Start a new request on this thread
    #[must_use]
    pub fn enter() -> RequestScopeGuard {
        Self::enter_with(RequestId::new())
    }

    /// Continue an existing request on this thread
    ///
    /// The request stays open until every guard entered for it, on any
    /// thread, has been dropped.
    #[must_use]
    pub fn enter_with(id: RequestId) -> RequestScopeGuard {
        SCOPES.entry(id).or_default().depth += 1;
        let previous = CURRENT_REQUEST.with(|current| current.replace(Some(id)));
        RequestScopeGuard {
            id,
            previous,
            _not_send: PhantomData,
        }
    }

    /// The request active on this thread, if any
    #[must_use]
    pub fn current() -> Option<RequestId> {
        CURRENT_REQUEST.with(Cell::get)
    }
}

/// Restores the previously active request when dropped
#[must_use = "the request scope ends when the guard is dropped"]
pub struct RequestScopeGuard {
    id: RequestId,
    previous: Option<RequestId>,
    // Scopes are per-thread and must be dropped where they were entered
    _not_send: PhantomData<*const ()>,
}

impl RequestScopeGuard {
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }
}

impl Drop for RequestScopeGuard {
    fn drop(&mut self) {
        CURRENT_REQUEST.with(|current| current.set(self.previous));

        let ended = match SCOPES.entry(self.id) {
            Entry::Occupied(mut entry) => {
                let scope = entry.get_mut();
                scope.depth = scope.depth.saturating_sub(1);
                if scope.depth == 0 {
                    Some(entry.remove().variables)
                } else {
                    None
                }
            }
            Entry::Vacant(_) => None,
        };

        // Hooks run after the registry entry is released
        if let Some(variables) = ended {
            trace!(request = %self.id, variables = variables.len(), "request scope ended");
            for variable in variables.iter().filter_map(Weak::upgrade) {
                variable.release(self.id);
            }
        }
    }
}

impl fmt::Debug for RequestScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScopeGuard")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Hooks controlling the values of a [`RequestVariable`]
pub trait RequestVariableLifecycle<T>: Send + Sync {
    /// Value a request sees on first access
    fn initial_value(&self) -> T;

    /// Called with the value when it is removed from its request
    fn shutdown(&self, _value: T) {}
}

impl<T, F> RequestVariableLifecycle<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn initial_value(&self) -> T {
        self()
    }
}

/// Variable holding one value per request scope
pub struct RequestVariable<T> {
    state: Arc<VariableState<T>>,
}

struct VariableState<T> {
    lifecycle: Box<dyn RequestVariableLifecycle<T>>,
    values: DashMap<RequestId, T>,
}

impl<T> RequestValues for VariableState<T>
where
    T: Send + Sync,
{
    fn release(&self, id: RequestId) {
        if let Some((_, value)) = self.values.remove(&id) {
            self.lifecycle.shutdown(value);
        }
    }
}

impl<T> Drop for VariableState<T> {
    fn drop(&mut self) {
        for (_, value) in std::mem::take(&mut self.values) {
            self.lifecycle.shutdown(value);
        }
    }
}

impl<T> RequestVariable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<L>(lifecycle: L) -> Self
    where
        L: RequestVariableLifecycle<T> + 'static,
    {
        Self {
            state: Arc::new(VariableState {
                lifecycle: Box::new(lifecycle),
                values: DashMap::new(),
            }),
        }
    }

    /// Value for the current request, initialized on first access
    ///
    /// `initial_value` runs without any lock held, so it may read this or
    /// other request variables. If another thread of the same request stored
    /// a value first, that value wins and the fresh one is shut down.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyError::RequestContextMissing` outside a request scope.
    pub fn get(&self) -> Result<T, Error> {
        let id = current_request()?;
        if let Some(value) = self.state.values.get(&id) {
            return Ok(value.clone());
        }

        let initial = self.state.lifecycle.initial_value();
        let existing = match self.state.values.entry(id) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(initial.clone());
                None
            }
        };

        match existing {
            Some(value) => {
                self.state.lifecycle.shutdown(initial);
                Ok(value)
            }
            None => {
                self.register(id);
                Ok(initial)
            }
        }
    }

    /// Replace the value for the current request
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyError::RequestContextMissing` outside a request scope.
    pub fn set(&self, value: T) -> Result<(), Error> {
        let id = current_request()?;
        match self.state.values.insert(id, value) {
            Some(previous) => self.state.lifecycle.shutdown(previous),
            None => self.register(id),
        }
        Ok(())
    }

    /// Drop the value for the current request, running the shutdown hook
    ///
    /// # Errors
    ///
    /// Returns `ConcurrencyError::RequestContextMissing` outside a request scope.
    pub fn remove(&self) -> Result<(), Error> {
        let id = current_request()?;
        self.state.release(id);
        Ok(())
    }

    /// Number of requests currently holding a value
    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.state.values.len()
    }

    fn register(&self, id: RequestId) {
        let weak: Weak<dyn RequestValues> = Arc::downgrade(&self.state) as Weak<VariableState<T>>;
        if let Some(mut scope) = SCOPES.get_mut(&id) {
            scope.variables.push(weak);
        }
    }
}

impl<T> fmt::Debug for RequestVariable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestVariable")
            .field("active_requests", &self.state.values.len())
            .finish_non_exhaustive()
    }
}

fn current_request() -> Result<RequestId, Error> {
    RequestScope::current().ok_or_else(|| ConcurrencyError::RequestContextMissing.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    struct Counting {
        shutdowns: Arc<AtomicUsize>,
    }

    impl RequestVariableLifecycle<Vec<String>> for Counting {
        fn initial_value(&self) -> Vec<String> {
            vec!["seed".to_string()]
        }

        fn shutdown(&self, _value: Vec<String>) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_outside_scope_is_an_error() {
        let variable = RequestVariable::new(|| 5_u32);
        assert!(matches!(
            variable.get(),
            Err(Error::Concurrency(ConcurrencyError::RequestContextMissing))
        ));
    }

    #[test]
    fn test_values_are_per_request() {
        let variable = RequestVariable::new(|| 0_u32);

        let first = RequestScope::enter();
        variable.set(1).unwrap();
        assert_eq!(variable.get().unwrap(), 1);
        drop(first);

        assert_eq!(variable.active_requests(), 0);

        let _second = RequestScope::enter();
        assert_eq!(variable.get().unwrap(), 0);
        assert_eq!(variable.active_requests(), 1);
    }

    #[test]
    fn test_ending_scope_shuts_down_values() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let variable = RequestVariable::new(Counting {
            shutdowns: Arc::clone(&shutdowns),
        });

        for _ in 0..100 {
            let _scope = RequestScope::enter();
            variable.get().unwrap();
        }

        assert_eq!(variable.active_requests(), 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_request_stays_open_until_outermost_guard() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let variable = RequestVariable::new(Counting {
            shutdowns: Arc::clone(&shutdowns),
        });

        let outer = RequestScope::enter();
        let inner = RequestScope::enter_with(outer.id());
        variable.get().unwrap();
        drop(inner);
        assert_eq!(variable.active_requests(), 1);
        assert_eq!(variable.get().unwrap(), vec!["seed".to_string()]);

        drop(outer);
        assert_eq!(variable.active_requests(), 0);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_variable_shuts_down_remaining_values() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let variable = RequestVariable::new(Counting {
            shutdowns: Arc::clone(&shutdowns),
        });

        let _scope = RequestScope::enter();
        variable.get().unwrap();
        drop(variable);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_initial_value_may_read_the_same_variable() {
        // Initial value is the number of requests already holding a value
        let this: Arc<OnceLock<Weak<RequestVariable<usize>>>> = Arc::new(OnceLock::new());
        let lookup = Arc::clone(&this);
        let variable = Arc::new(RequestVariable::new(move || {
            lookup
                .get()
                .and_then(Weak::upgrade)
                .map_or(0, |variable| variable.active_requests())
        }));
        this.set(Arc::downgrade(&variable)).unwrap();

        let _first = RequestScope::enter();
        assert_eq!(variable.get().unwrap(), 0);
        let _second = RequestScope::enter();
        assert_eq!(variable.get().unwrap(), 1);
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        assert_eq!(RequestScope::current(), None);
        let outer = RequestScope::enter();
        {
            let inner = RequestScope::enter();
            assert_eq!(RequestScope::current(), Some(inner.id()));
        }
        assert_eq!(RequestScope::current(), Some(outer.id()));
        drop(outer);
        assert_eq!(RequestScope::current(), None);
    }

    #[test]
    fn test_remove_runs_shutdown_hook() {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let variable = RequestVariable::new(Counting {
            shutdowns: Arc::clone(&shutdowns),
        });

        let _scope = RequestScope::enter();
        assert_eq!(variable.get().unwrap(), vec!["seed".to_string()]);
        variable.set(vec!["replaced".to_string()]).unwrap();
        variable.remove().unwrap();
        variable.remove().unwrap();

        // once for the replaced seed, once for the removed value
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        assert_eq!(variable.active_requests(), 0);
    }
}
