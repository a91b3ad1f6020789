//! Submitting units of work through a concurrency strategy

use serde::Serialize;
use std::thread;
use strand_concurrency::{ConcurrencyStrategy, TaskHandle, UnitOfWork};
use strand_errors::{Error, TaskError};
use strand_propagation::TraceContext;
use strand_types::{ThreadPoolKey, ThreadPoolSizing};
use tracing::{debug, info, info_span, warn};

/// What to run
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub key: ThreadPoolKey,
    pub sizing: ThreadPoolSizing,
    pub tasks: usize,
    pub fail_every: Option<usize>,
}

impl RunPlan {
    fn should_fail(&self, index: usize) -> bool {
        self.fail_every
            .is_some_and(|every| every > 0 && (index + 1) % every == 0)
    }
}

/// What a unit saw on the thread it ran on
#[derive(Debug)]
struct Observation {
    thread: String,
    context: Option<TraceContext>,
}

/// Outcome of one submitted unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum UnitStatus {
    Completed {
        thread: String,
        context: Option<TraceContext>,
    },
    Failed {
        error: String,
    },
    Rejected {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub index: usize,
    #[serde(flatten)]
    pub status: UnitStatus,
}

impl UnitReport {
    /// Whether the unit ran under the submitting trace
    #[must_use]
    pub fn in_trace(&self, root: &TraceContext) -> bool {
        matches!(
            &self.status,
            UnitStatus::Completed {
                context: Some(context),
                ..
            } if context.trace_id == root.trace_id
        )
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub pool: ThreadPoolKey,
    pub propagation: bool,
    pub root: TraceContext,
    pub completed_tasks: u64,
    pub units: Vec<UnitReport>,
}

impl RunReport {
    #[must_use]
    pub fn propagated(&self) -> usize {
        self.units.iter().filter(|u| u.in_trace(&self.root)).count()
    }
}

/// Create a pool through `strategy`, submit `plan.tasks` units from inside a
/// fresh trace, and wait for all of them
///
/// Each unit records the worker thread it ran on and the trace context it
/// observed there. Rejected submissions and failed units are reported per
/// unit rather than aborting the run.
///
/// # Errors
///
/// Returns an error if the strategy cannot create the pool.
pub fn run_units<S>(strategy: &S, plan: &RunPlan, propagation: bool) -> Result<RunReport, Error>
where
    S: ConcurrencyStrategy,
{
    let pool = strategy.create_thread_pool(&plan.key, &plan.sizing)?;
    let root = TraceContext::new_root();

    let mut units = Vec::with_capacity(plan.tasks);
    {
        let _scope = root.attach();
        let span = info_span!("run", pool = %plan.key, trace = %root);
        let _entered = span.enter();
        info!(tasks = plan.tasks, propagation, "submitting units of work");

        let mut pending: Vec<(usize, TaskHandle<Observation>)> = Vec::with_capacity(plan.tasks);
        for index in 0..plan.tasks {
            let fail = plan.should_fail(index);
            let work = UnitOfWork::new(move || {
                if fail {
                    return Err(TaskError::failed(format!("unit {index} failed on request")));
                }
                Ok(Observation {
                    thread: thread::current().name().unwrap_or("unnamed").to_string(),
                    context: TraceContext::current(),
                })
            });
            let work = strategy.wrap_unit_of_work(work);
            match pool.submit(work) {
                Ok(handle) => pending.push((index, handle)),
                Err(e) => {
                    warn!(unit = index, error = %e, "submission failed");
                    units.push(UnitReport {
                        index,
                        status: UnitStatus::Rejected {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        for (index, handle) in pending {
            units.push(UnitReport {
                index,
                status: match handle.join() {
                    Ok(Observation { thread, context }) => {
                        UnitStatus::Completed { thread, context }
                    }
                    Err(e) => UnitStatus::Failed {
                        error: e.to_string(),
                    },
                },
            });
        }
    }

    pool.await_termination();
    units.sort_by_key(|unit| unit.index);
    debug!(pool = %plan.key, completed = pool.completed_tasks(), "run finished");

    Ok(RunReport {
        pool: plan.key.clone(),
        propagation,
        root,
        completed_tasks: pool.completed_tasks(),
        units,
    })
}
