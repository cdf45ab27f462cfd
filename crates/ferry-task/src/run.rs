//! Entry points for running a task in another isolate

use crate::capsule::ResumeCapsule;
use crate::runner::{Phase2Runner, Phase2RunnerIgnored};
use crate::sync::run_sync;
use crate::task::{RunMode, TaskFactory};
use ferry_core::{Isolate, IsolateScope, RuntimeError, Value};

/// Run task `T` with `args` against `target`, delivering the result per `mode`
///
/// `scope` is the origin isolate; Phase 1 runs here before this returns.
///
/// - [`RunMode::Sync`]: blocks and returns the Phase 3 value or the error
///   from any phase.
/// - [`RunMode::Async`]: returns a promise and never fails; every error ends
///   up as the promise's rejection.
/// - [`RunMode::AsyncIgnored`]: returns `undefined` once the work is queued.
///   Only a Phase 1 error is reported to the caller.
pub fn run<T: TaskFactory>(
    mode: RunMode,
    scope: &mut IsolateScope,
    target: &Isolate,
    args: T::Args,
) -> Result<Value, RuntimeError> {
    match mode {
        RunMode::Sync => run_sync::<T>(scope, target, args),
        RunMode::Async => Ok(run_async::<T>(scope, target, args)),
        RunMode::AsyncIgnored => run_ignored::<T>(scope, target, args),
    }
}

/// Run a task in `target` and return a promise for its result
///
/// The promise is created before Phase 1, so a Phase 1 error rejects it
/// immediately and nothing is queued on the target. Otherwise Phase 2 is
/// queued on the target and the promise settles on the origin's worker.
pub fn run_async<T: TaskFactory>(
    scope: &mut IsolateScope,
    target: &Isolate,
    args: T::Args,
) -> Value {
    let (promise, capsule) = ResumeCapsule::new(scope);

    match T::construct(scope, args) {
        Ok(task) => {
            tracing::debug!(
                target: "ferry::task",
                origin = %scope.id(),
                target_isolate = %target.id(),
                "scheduling phase 2"
            );
            target.schedule_task(
                Box::new(Phase2Runner::new(Box::new(task), capsule)),
                false,
                true,
            );
        }
        Err(err) => {
            tracing::debug!(
                target: "ferry::task",
                origin = %scope.id(),
                error = %err,
                "phase 1 failed"
            );
            capsule.settle(scope, |_| Err(err));
        }
    }

    promise
}

/// Run a task in `target` without waiting for or observing its result
///
/// Returns `undefined` as soon as Phase 2 is queued. A Phase 1 error is
/// returned; a Phase 2 error is logged and passed to the target's failure
/// sink.
pub fn run_ignored<T: TaskFactory>(
    scope: &mut IsolateScope,
    target: &Isolate,
    args: T::Args,
) -> Result<Value, RuntimeError> {
    let task = T::construct(scope, args)?;
    target.schedule_task(
        Box::new(Phase2RunnerIgnored::new(Box::new(task))),
        false,
        true,
    );
    Ok(Value::Undefined)
}
