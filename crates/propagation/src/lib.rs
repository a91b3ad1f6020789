#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Trace context propagation across thread pools
//!
//! Work submitted to a thread pool runs on a thread that knows nothing about
//! the trace the submitter was part of. [`PropagatingConcurrencyStrategy`]
//! decorates any [`ConcurrencyStrategy`]: pool, queue and request-variable
//! creation are forwarded untouched, while every unit of work is wrapped once
//! so the submitter's trace context is captured at wrap time and installed
//! on whichever worker eventually runs it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strand_concurrency::{ConcurrencyStrategy, UnitOfWork};
//! use strand_propagation::{PropagatingConcurrencyStrategy, TraceContext, TracingPropagator};
//! use strand_types::{ThreadPoolKey, ThreadPoolSizing};
//!
//! let strategy = PropagatingConcurrencyStrategy::new(Arc::new(TracingPropagator));
//! let pool = strategy
//!     .create_thread_pool(&ThreadPoolKey::new("payments"), &ThreadPoolSizing::default())
//!     .unwrap();
//!
//! let _scope = TraceContext::new_root().attach();
//! let work = strategy.wrap_unit_of_work(UnitOfWork::from_fn(TraceContext::current));
//! let seen = pool.submit(work).unwrap().join().unwrap();
//! assert_eq!(seen, TraceContext::current());
//! ```
//!
//! [`ConcurrencyStrategy`]: strand_concurrency::ConcurrencyStrategy

pub mod context;
pub mod propagator;
pub mod strategy;

pub use context::{ContextScope, TraceContext};
pub use propagator::{ContextPropagator, TracingPropagator};
pub use strategy::PropagatingConcurrencyStrategy;
