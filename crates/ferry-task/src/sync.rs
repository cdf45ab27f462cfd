//! Synchronous path: all three phases on the calling thread

use crate::runner::{run_phase2, run_phase3};
use crate::task::TaskFactory;
use ferry_core::{Isolate, IsolateScope, RuntimeError, Value};

/// Run a task to completion, blocking the calling thread
///
/// Phase 1 and Phase 3 run under `scope`; Phase 2 runs under a lock of
/// `target` taken on this thread (or under `scope` itself when `target` is
/// the origin). A disposed target fails with "Isolate is disposed".
///
/// Two threads running synchronously in opposite directions between the same
/// pair of isolates deadlock; use [`run_async`](crate::run_async) for calls
/// that may go both ways.
pub fn run_sync<T: TaskFactory>(
    scope: &mut IsolateScope,
    target: &Isolate,
    args: T::Args,
) -> Result<Value, RuntimeError> {
    let mut task = T::construct(scope, args)?;

    if target.same(scope.isolate()) {
        run_phase2(&mut task, scope)?;
    } else {
        let mut target_scope = target.lock()?;
        run_phase2(&mut task, &mut target_scope)?;
    }

    run_phase3(Box::new(task), scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ThreePhaseTask;
    use ferry_core::{marshal, unmarshal, MarshalledValue};

    /// Copies an array into the target, sums it there, returns the sum
    struct Sum {
        input: MarshalledValue,
        ran_in: Option<ferry_core::IsolateId>,
        total: i32,
    }

    impl TaskFactory for Sum {
        type Args = Value;

        fn construct(scope: &mut IsolateScope, args: Value) -> Result<Self, RuntimeError> {
            Ok(Self {
                input: marshal(&args, scope)?,
                ran_in: None,
                total: 0,
            })
        }
    }

    impl ThreePhaseTask for Sum {
        fn phase2(&mut self, scope: &mut IsolateScope) -> Result<(), RuntimeError> {
            let array = unmarshal(self.input.clone(), scope)?;
            for item in scope.array_items(&array)? {
                let n = item
                    .as_i32()
                    .ok_or_else(|| RuntimeError::type_error("expected numbers"))?;
                self.total += n;
            }
            scope.release(&array);
            self.ran_in = Some(scope.id());
            Ok(())
        }

        fn phase3(self: Box<Self>, _scope: &mut IsolateScope) -> Result<Value, RuntimeError> {
            Ok(Value::I32(self.total))
        }
    }

    #[test]
    fn test_sync_sum_in_other_isolate() {
        let origin = Isolate::with_defaults().unwrap();
        let target = Isolate::with_defaults().unwrap();
        let mut scope = origin.lock().unwrap();

        let array = scope.new_array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
        let result = run_sync::<Sum>(&mut scope, &target, array).unwrap();
        assert_eq!(result, Value::I32(6));
        assert!(!target.is_disposed());

        drop(scope);
        origin.dispose();
        target.dispose();
    }

    #[test]
    fn test_sync_into_same_isolate_reuses_scope() {
        let isolate = Isolate::with_defaults().unwrap();
        let mut scope = isolate.lock().unwrap();

        let array = scope.new_array(vec![Value::I32(4), Value::I32(5)]);
        let result = run_sync::<Sum>(&mut scope, &isolate, array).unwrap();
        assert_eq!(result, Value::I32(9));

        drop(scope);
        isolate.dispose();
    }

    #[test]
    fn test_sync_phase2_error_is_returned() {
        let origin = Isolate::with_defaults().unwrap();
        let target = Isolate::with_defaults().unwrap();
        let mut scope = origin.lock().unwrap();

        let array = scope.new_array(vec![Value::from("x")]);
        let err = run_sync::<Sum>(&mut scope, &target, array).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: expected numbers");

        // The target lock was released on the error path.
        assert!(target.lock().is_ok());

        drop(scope);
        origin.dispose();
        target.dispose();
    }

    #[test]
    fn test_sync_into_disposed_target() {
        let origin = Isolate::with_defaults().unwrap();
        let target = Isolate::with_defaults().unwrap();
        target.dispose();

        let mut scope = origin.lock().unwrap();
        let array = scope.new_array(vec![]);
        let err = run_sync::<Sum>(&mut scope, &target, array).unwrap_err();
        assert_eq!(err.message(), "Isolate is disposed");

        drop(scope);
        origin.dispose();
    }
}
