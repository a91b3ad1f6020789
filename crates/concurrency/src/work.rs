//! Units of work handed to thread pools

use std::fmt;
use strand_errors::TaskError;

/// Outcome of running a unit of work
pub type WorkResult<T> = Result<T, TaskError>;

/// Type-erased body of a unit of work
pub type Task<T> = Box<dyn FnOnce() -> WorkResult<T> + Send + 'static>;

/// A task submitted for execution, possibly on another thread
///
/// The variant records whether the task already restores the submitter's
/// context when it runs. Decorators match on it so a task is never wrapped
/// twice, however many layers it passes through.
pub enum UnitOfWork<T> {
    /// A task as submitted by the caller
    Plain(Task<T>),
    /// A task that already carries the submitting thread's context
    Propagated(Task<T>),
}

impl<T> UnitOfWork<T> {
    /// Create a plain unit of work from a closure
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> WorkResult<T> + Send + 'static,
    {
        Self::Plain(Box::new(f))
    }

    /// Create a plain unit of work from an infallible closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::Plain(Box::new(move || Ok(f())))
    }

    /// Whether this unit already carries propagated context
    #[must_use]
    pub fn is_propagated(&self) -> bool {
        matches!(self, Self::Propagated(_))
    }

    /// Run the task on the current thread
    ///
    /// # Errors
    ///
    /// Returns whatever failure the task itself reports.
    pub fn call(self) -> WorkResult<T> {
        (self.into_task())()
    }

    /// Strip the marker and return the task body
    #[must_use]
    pub fn into_task(self) -> Task<T> {
        match self {
            Self::Plain(task) | Self::Propagated(task) => task,
        }
    }
}

impl<T> fmt::Debug for UnitOfWork<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("UnitOfWork::Plain(..)"),
            Self::Propagated(_) => f.write_str("UnitOfWork::Propagated(..)"),
        }
    }
}
