#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Concurrency primitives for strand
//!
//! This crate defines the [`ConcurrencyStrategy`] seam through which thread
//! pools, work queues and request-scoped variables are created, together with
//! the default implementation of each. Strategies can be layered: a decorator
//! implements the same trait and forwards to an inner strategy.

pub mod pool;
pub mod queue;
pub mod request;
pub mod strategy;
pub mod work;

pub use pool::{TaskHandle, ThreadPool};
pub use queue::WorkQueue;
pub use request::{
    RequestId, RequestScope, RequestScopeGuard, RequestVariable, RequestVariableLifecycle,
};
pub use strategy::{wrap_unit_of_work_default, ConcurrencyStrategy, DefaultConcurrencyStrategy};
pub use work::{Task, UnitOfWork, WorkResult};
