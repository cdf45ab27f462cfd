//! Units of work that carry a task between isolates
//!
//! An asynchronous call is a chain of two units: a [`Phase2Runner`] on the
//! target's queue, and a [`ResumeRunner`] on the origin's queue. A
//! fire-and-forget call is a single [`Phase2RunnerIgnored`]. Each unit owns
//! the task while it is queued, so ownership moves with every enqueue.

use crate::capsule::ResumeCapsule;
use crate::task::ThreePhaseTask;
use ferry_core::{IsolateScope, Runnable, RuntimeError, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, turning a panic into a task error
fn catch_panic<R>(f: impl FnOnce() -> Result<R, RuntimeError>) -> Result<R, RuntimeError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(RuntimeError::error(format!(
            "Task panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Phase 2 with panics reported as errors
pub(crate) fn run_phase2(
    task: &mut dyn ThreePhaseTask,
    scope: &mut IsolateScope,
) -> Result<(), RuntimeError> {
    catch_panic(|| task.phase2(scope))
}

/// Phase 3 with panics reported as errors
pub(crate) fn run_phase3(
    task: Box<dyn ThreePhaseTask>,
    scope: &mut IsolateScope,
) -> Result<Value, RuntimeError> {
    catch_panic(|| task.phase3(scope))
}

/// Target leg of an asynchronous call
///
/// Runs Phase 2 and schedules the matching [`ResumeRunner`] on the origin.
/// If it is dropped without running (its target was disposed), the promise
/// is rejected with "Isolate is disposed" instead.
pub(crate) struct Phase2Runner {
    task: Option<Box<dyn ThreePhaseTask>>,
    capsule: Option<ResumeCapsule>,
    did_run: bool,
}

impl Phase2Runner {
    pub(crate) fn new(task: Box<dyn ThreePhaseTask>, capsule: ResumeCapsule) -> Self {
        Self {
            task: Some(task),
            capsule: Some(capsule),
            did_run: false,
        }
    }
}

impl Runnable for Phase2Runner {
    fn run(mut self: Box<Self>, scope: &mut IsolateScope) {
        self.did_run = true;
        let (Some(mut task), Some(capsule)) = (self.task.take(), self.capsule.take()) else {
            return;
        };

        let resume = match run_phase2(task.as_mut(), scope) {
            Ok(()) => ResumeRunner::resolve(task, capsule),
            Err(err) => {
                tracing::debug!(
                    target: "ferry::task",
                    isolate = %scope.id(),
                    error = %err,
                    "phase 2 failed"
                );
                drop(task);
                ResumeRunner::reject(err, capsule)
            }
        };
        resume.schedule();
    }
}

impl Drop for Phase2Runner {
    fn drop(&mut self) {
        if self.did_run {
            return;
        }
        // Release the task before touching the origin.
        self.task.take();
        if let Some(capsule) = self.capsule.take() {
            tracing::debug!(
                target: "ferry::task",
                origin = %capsule.origin_id(),
                "phase 2 never ran, rejecting"
            );
            ResumeRunner::reject(RuntimeError::isolate_disposed(), capsule).schedule();
        }
    }
}

enum Resume {
    Resolve(Box<dyn ThreePhaseTask>),
    Reject(RuntimeError),
}

/// Origin leg of an asynchronous call
///
/// Either runs Phase 3 and fulfils the promise, or rejects it with the
/// failure carried from the target. Dropping it unrun is silent: the only
/// way that happens is the origin going away, and then nobody is waiting.
pub(crate) struct ResumeRunner {
    outcome: Resume,
    capsule: ResumeCapsule,
}

impl ResumeRunner {
    pub(crate) fn resolve(task: Box<dyn ThreePhaseTask>, capsule: ResumeCapsule) -> Self {
        Self {
            outcome: Resume::Resolve(task),
            capsule,
        }
    }

    pub(crate) fn reject(error: RuntimeError, capsule: ResumeCapsule) -> Self {
        Self {
            outcome: Resume::Reject(error),
            capsule,
        }
    }

    /// Queue onto the origin, or drop if the origin is gone
    fn schedule(self) {
        match self.capsule.origin() {
            Some(origin) => origin.schedule_task(Box::new(self), false, true),
            None => {
                tracing::debug!(
                    target: "ferry::task",
                    origin = %self.capsule.origin_id(),
                    "origin disposed, dropping result"
                );
            }
        }
    }
}

impl Runnable for ResumeRunner {
    fn run(self: Box<Self>, scope: &mut IsolateScope) {
        let ResumeRunner { outcome, capsule } = *self;
        let origin = capsule.origin_id();
        let stack = capsule.stack().clone();

        let settled = capsule.settle(scope, move |scope| match outcome {
            Resume::Resolve(task) => run_phase3(task, scope),
            Resume::Reject(err) => Err(err.chain_stack(&stack)),
        });
        tracing::trace!(target: "ferry::task", %origin, settled, "resume unit finished");
    }
}

/// Target leg of a fire-and-forget call
///
/// Runs Phase 2 and discards the task. Failures go to the log and to the
/// target's failure sink, if one is configured.
pub(crate) struct Phase2RunnerIgnored {
    task: Box<dyn ThreePhaseTask>,
}

impl Phase2RunnerIgnored {
    pub(crate) fn new(task: Box<dyn ThreePhaseTask>) -> Self {
        Self { task }
    }
}

impl Runnable for Phase2RunnerIgnored {
    fn run(self: Box<Self>, scope: &mut IsolateScope) {
        let mut task = self.task;
        if let Err(err) = run_phase2(task.as_mut(), scope) {
            tracing::warn!(
                target: "ferry::task",
                isolate = %scope.id(),
                error = %err,
                "ignored task failed"
            );
            if let Some(sink) = scope.isolate().failure_sink().cloned() {
                sink(scope.id(), &err);
            }
        }
    }
}
