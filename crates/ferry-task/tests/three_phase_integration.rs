//! Integration tests for three-phase tasks across isolates

use crossbeam::channel::{self, Receiver};
use ferry_core::{
    marshal, AsyncContext, AsyncId, Isolate, IsolateId, IsolateOptions, IsolateScope,
    MarshalledValue, RuntimeError, Value,
};
use ferry_task::{run, run_async, run_ignored, run_sync, RunMode, TaskFactory, ThreePhaseTask};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

/// What the phases of a [`Double`] task observed
#[derive(Default)]
struct Probe {
    phase2_runs: AtomicUsize,
    phase3_runs: AtomicUsize,
    phase2_isolate: Mutex<Option<IsolateId>>,
    phase3_context: Mutex<Option<AsyncContext>>,
}

/// Phase 2 echoes the input, Phase 3 doubles it
///
/// Inputs with special behaviour: negative fails Phase 2 with a RangeError,
/// 13 throws a guest string, 99 panics, and anything whose double overflows
/// fails Phase 3.
struct Double {
    input: i32,
    output: Option<i32>,
    probe: Arc<Probe>,
}

impl TaskFactory for Double {
    type Args = (Value, Arc<Probe>);

    fn construct(
        _scope: &mut IsolateScope,
        (value, probe): Self::Args,
    ) -> Result<Self, RuntimeError> {
        let input = value.as_i32().ok_or_else(|| {
            RuntimeError::type_error(format!("expected i32, got {}", value.type_name()))
        })?;
        Ok(Self {
            input,
            output: None,
            probe,
        })
    }
}

impl ThreePhaseTask for Double {
    fn phase2(&mut self, scope: &mut IsolateScope) -> Result<(), RuntimeError> {
        self.probe.phase2_runs.fetch_add(1, Ordering::SeqCst);
        *self.probe.phase2_isolate.lock() = Some(scope.id());
        match self.input {
            n if n < 0 => Err(RuntimeError::range_error("negative input")),
            13 => Err(RuntimeError::thrown(MarshalledValue::String("boom".to_string()))),
            99 => panic!("unlucky input"),
            n => {
                self.output = Some(n);
                Ok(())
            }
        }
    }

    fn phase3(self: Box<Self>, scope: &mut IsolateScope) -> Result<Value, RuntimeError> {
        self.probe.phase3_runs.fetch_add(1, Ordering::SeqCst);
        *self.probe.phase3_context.lock() = Some(scope.current_async_context());
        let output = self
            .output
            .ok_or_else(|| RuntimeError::error("phase 3 before phase 2"))?;
        output
            .checked_mul(2)
            .map(Value::I32)
            .ok_or_else(|| RuntimeError::range_error("result overflows"))
    }
}

type Settled = Result<MarshalledValue, MarshalledValue>;

/// Report the promise's outcome, copied out of the origin, once it settles
fn watch(scope: &mut IsolateScope, promise: &Value) -> Receiver<Settled> {
    let (tx, rx) = channel::unbounded();
    scope
        .on_settled(promise, move |scope, outcome| {
            let copied = match outcome {
                Ok(value) => Ok(marshal(&value, scope).unwrap()),
                Err(reason) => Err(marshal(&reason, scope).unwrap()),
            };
            let _ = tx.send(copied);
        })
        .unwrap();
    rx
}

fn rejection_message(settled: Settled) -> String {
    match settled {
        Err(MarshalledValue::Error { message, .. }) => message,
        other => panic!("expected an error rejection, got {:?}", other),
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}

fn pair() -> (Isolate, Isolate) {
    (
        Isolate::new(IsolateOptions::default().with_name("origin")).unwrap(),
        Isolate::new(IsolateOptions::default().with_name("target")).unwrap(),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Synchronous mode
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sync_returns_phase3_value() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());
    let mut scope = origin.lock().unwrap();

    let args = (Value::I32(21), probe.clone());
    let result = run::<Double>(RunMode::Sync, &mut scope, &target, args);

    assert_eq!(result.unwrap(), Value::I32(42));
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 1);
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 1);
    assert_eq!(*probe.phase2_isolate.lock(), Some(target.id()));

    drop(scope);
    origin.dispose();
    target.dispose();
}

#[test]
fn test_sync_phase1_error_skips_other_phases() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());
    let mut scope = origin.lock().unwrap();
    let heap_before = scope.heap_len();

    let err =
        run_sync::<Double>(&mut scope, &target, (Value::from("x"), probe.clone())).unwrap_err();

    assert_eq!(err.to_string(), "TypeError: expected i32, got string");
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);
    // No promise was created.
    assert_eq!(scope.heap_len(), heap_before);

    drop(scope);
    origin.dispose();
    target.dispose();
}

#[test]
fn test_sync_phase2_and_phase3_errors() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());
    let mut scope = origin.lock().unwrap();

    let err = run_sync::<Double>(&mut scope, &target, (Value::I32(-1), probe.clone())).unwrap_err();
    assert_eq!(err.message(), "negative input");
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);

    let err = run_sync::<Double>(&mut scope, &target, (Value::I32(i32::MAX), probe.clone()))
        .unwrap_err();
    assert_eq!(err.message(), "result overflows");
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 1);

    drop(scope);
    origin.dispose();
    target.dispose();
}

#[test]
fn test_sync_waits_for_busy_target() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let held = target.lock().unwrap();
    let caller = {
        let origin = origin.clone();
        let target = target.clone();
        let probe = probe.clone();
        thread::spawn(move || {
            let mut scope = origin.lock().unwrap();
            run_sync::<Double>(&mut scope, &target, (Value::I32(5), probe)).unwrap()
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);
    drop(held);

    assert_eq!(caller.join().unwrap(), Value::I32(10));
    origin.dispose();
    target.dispose();
}

// ────────────────────────────────────────────────────────────────────────────
// Asynchronous mode
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_async_resolves_with_phase3_value() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let args = (Value::I32(4), probe.clone());
        let promise = run::<Double>(RunMode::Async, &mut scope, &target, args).unwrap();
        watch(&mut scope, &promise)
    };

    assert_eq!(settled.recv_timeout(TIMEOUT).unwrap(), Ok(MarshalledValue::I32(8)));
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 1);
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 1);
    assert_eq!(*probe.phase2_isolate.lock(), Some(target.id()));

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_phase2_error_rejects_without_phase3() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(-3), probe.clone()));
        watch(&mut scope, &promise)
    };

    let outcome = settled.recv_timeout(TIMEOUT).unwrap();
    assert!(matches!(
        &outcome,
        Err(MarshalledValue::Error { name, .. }) if name == "RangeError"
    ));
    assert_eq!(rejection_message(outcome), "negative input");
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_thrown_value_round_trips() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(13), probe));
        watch(&mut scope, &promise)
    };

    assert_eq!(
        settled.recv_timeout(TIMEOUT).unwrap(),
        Err(MarshalledValue::String("boom".to_string()))
    );

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_phase1_error_never_reaches_target() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::Null, probe.clone()));
        watch(&mut scope, &promise)
    };

    // Already rejected before the origin lock was released.
    let outcome = settled.try_recv().unwrap();
    assert_eq!(rejection_message(outcome), "expected i32, got null");
    assert_eq!(target.stats().scheduled, 0);
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_phase3_error_rejects() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(i32::MAX), probe));
        watch(&mut scope, &promise)
    };

    assert_eq!(
        rejection_message(settled.recv_timeout(TIMEOUT).unwrap()),
        "result overflows"
    );

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_phase2_panic_rejects() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(99), probe));
        watch(&mut scope, &promise)
    };

    let message = rejection_message(settled.recv_timeout(TIMEOUT).unwrap());
    assert!(message.starts_with("Task panicked"), "message: {}", message);
    assert!(message.contains("unlucky input"));

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_rejection_carries_caller_stack() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = scope.with_frame("main", Some("app.ry:1"), |scope| {
            scope.with_frame("fetchAll", Some("app.ry:12"), |scope| {
                run_async::<Double>(scope, &target, (Value::I32(-1), probe))
            })
        });
        watch(&mut scope, &promise)
    };

    let Err(MarshalledValue::Error { stack, .. }) = settled.recv_timeout(TIMEOUT).unwrap() else {
        panic!("expected an error rejection");
    };
    assert!(stack.contains("(<async>)"), "stack: {}", stack);
    let inner = stack.find("at fetchAll (app.ry:12)").expect("inner frame");
    let outer = stack.find("at main (app.ry:1)").expect("outer frame");
    assert!(inner < outer);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_phase3_runs_in_captured_context() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let (caller, settled) = {
        let mut scope = origin.lock().unwrap();
        let caller = scope.new_async_context();
        let promise = scope.with_async_context(caller, |scope| {
            run_async::<Double>(scope, &target, (Value::I32(1), probe.clone()))
        });
        (caller, watch(&mut scope, &promise))
    };

    assert!(settled.recv_timeout(TIMEOUT).unwrap().is_ok());
    let observed = probe.phase3_context.lock().expect("phase 3 ran");
    assert_eq!(observed.trigger_id, caller.async_id);
    assert_ne!(observed.async_id, caller.async_id);
    assert_ne!(observed.async_id, AsyncId::ROOT);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_into_same_isolate() {
    let isolate = Isolate::with_defaults().unwrap();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = isolate.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &isolate, (Value::I32(3), probe.clone()));
        watch(&mut scope, &promise)
    };

    assert_eq!(settled.recv_timeout(TIMEOUT).unwrap(), Ok(MarshalledValue::I32(6)));
    assert_eq!(*probe.phase2_isolate.lock(), Some(isolate.id()));
    isolate.dispose();
}

#[test]
fn test_many_async_calls_settle_exactly_once() {
    let (origin, target) = pair();
    let probes: Vec<Arc<Probe>> = (0..64).map(|_| Arc::new(Probe::default())).collect();

    let receivers: Vec<_> = {
        let mut scope = origin.lock().unwrap();
        probes
            .iter()
            .enumerate()
            .map(|(i, probe)| {
                let input = if i % 4 == 0 { -(i as i32) - 1 } else { i as i32 };
                let args = (Value::I32(input), probe.clone());
                let promise = run_async::<Double>(&mut scope, &target, args);
                watch(&mut scope, &promise)
            })
            .collect()
    };

    for (i, rx) in receivers.iter().enumerate() {
        let outcome = rx.recv_timeout(TIMEOUT).unwrap();
        if i % 4 == 0 {
            assert!(outcome.is_err());
        } else {
            assert_eq!(outcome, Ok(MarshalledValue::I32(i as i32 * 2)));
        }
    }

    // Let any stray delivery arrive before checking for duplicates.
    thread::sleep(Duration::from_millis(50));
    for (i, (rx, probe)) in receivers.iter().zip(&probes).enumerate() {
        assert!(rx.try_recv().is_err(), "promise {} settled twice", i);
        assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 1);
        let expected_phase3 = if i % 4 == 0 { 0 } else { 1 };
        assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), expected_phase3);
    }

    origin.dispose();
    target.dispose();
}

#[test]
fn test_async_calls_from_many_origins() {
    let target = Isolate::new(IsolateOptions::default().with_name("shared-target")).unwrap();

    let callers: Vec<_> = (0..4)
        .map(|n| {
            let target = target.clone();
            thread::spawn(move || {
                let origin = Isolate::with_defaults().unwrap();
                let receivers: Vec<_> = {
                    let mut scope = origin.lock().unwrap();
                    (0..10)
                        .map(|i| {
                            let probe = Arc::new(Probe::default());
                            let promise = run_async::<Double>(
                                &mut scope,
                                &target,
                                (Value::I32(n * 100 + i), probe),
                            );
                            watch(&mut scope, &promise)
                        })
                        .collect()
                };
                let results: Vec<_> = receivers
                    .iter()
                    .map(|rx| rx.recv_timeout(TIMEOUT).unwrap())
                    .collect();
                origin.dispose();
                results
            })
        })
        .collect();

    for (n, caller) in callers.into_iter().enumerate() {
        let results = caller.join().unwrap();
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result, Ok(MarshalledValue::I32((n as i32 * 100 + i as i32) * 2)));
        }
    }
    target.dispose();
}

// ────────────────────────────────────────────────────────────────────────────
// Disposal
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_async_into_disposed_target_rejects() {
    let (origin, target) = pair();
    target.dispose();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(1), probe.clone()));
        watch(&mut scope, &promise)
    };

    assert_eq!(
        rejection_message(settled.recv_timeout(TIMEOUT).unwrap()),
        "Isolate is disposed"
    );
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);
    origin.dispose();
}

#[test]
fn test_target_disposed_with_queued_task_rejects() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let settled = {
        let mut scope = origin.lock().unwrap();
        // Keep the target busy so the task stays queued until disposal.
        let target_scope = target.lock().unwrap();
        let promise = run_async::<Double>(&mut scope, &target, (Value::I32(1), probe.clone()));
        target.dispose();
        drop(target_scope);
        watch(&mut scope, &promise)
    };

    assert_eq!(
        rejection_message(settled.recv_timeout(TIMEOUT).unwrap()),
        "Isolate is disposed"
    );
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);
    origin.dispose();
}

#[test]
fn test_origin_disposed_before_resume_is_silent() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    {
        let mut scope = origin.lock().unwrap();
        let _promise = run_async::<Double>(&mut scope, &target, (Value::I32(7), probe.clone()));
        // Phase 2 completes while the origin is still locked by this thread.
        wait_until(|| probe.phase2_runs.load(Ordering::SeqCst) == 1);
        origin.dispose();
    }

    // The resume unit is dropped and never touches the freed promise.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);

    // The target is unaffected.
    let other = Isolate::with_defaults().unwrap();
    let mut scope = other.lock().unwrap();
    let result = run_sync::<Double>(&mut scope, &target, (Value::I32(2), probe)).unwrap();
    assert_eq!(result, Value::I32(4));

    drop(scope);
    other.dispose();
    target.dispose();
}

#[test]
fn test_origin_disposed_before_phase2_still_runs_phase2() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let target_scope = target.lock().unwrap();
    {
        let mut scope = origin.lock().unwrap();
        let _promise = run_async::<Double>(&mut scope, &target, (Value::I32(7), probe.clone()));
    }
    origin.dispose();
    drop(target_scope);

    wait_until(|| probe.phase2_runs.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);
    target.dispose();
}

// ────────────────────────────────────────────────────────────────────────────
// Fire-and-forget mode
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ignored_returns_before_phase2() {
    let (origin, target) = pair();
    let probe = Arc::new(Probe::default());

    let target_scope = target.lock().unwrap();
    let result = {
        let mut scope = origin.lock().unwrap();
        run::<Double>(RunMode::AsyncIgnored, &mut scope, &target, (Value::I32(2), probe.clone()))
    };

    assert_eq!(result.unwrap(), Value::Undefined);
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);
    drop(target_scope);

    wait_until(|| probe.phase2_runs.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_ignored_failure_goes_to_sink() {
    let (tx, rx) = channel::unbounded();
    let target = Isolate::new(
        IsolateOptions::default()
            .with_name("sink-target")
            .with_failure_sink(move |id, err| {
                let _ = tx.send((id, err.message().to_string()));
            }),
    )
    .unwrap();
    let origin = Isolate::with_defaults().unwrap();
    let probe = Arc::new(Probe::default());

    let result = {
        let mut scope = origin.lock().unwrap();
        run_ignored::<Double>(&mut scope, &target, (Value::I32(-5), probe.clone()))
    };
    assert_eq!(result.unwrap(), Value::Undefined);

    let (id, message) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(id, target.id());
    assert_eq!(message, "negative input");
    assert_eq!(probe.phase3_runs.load(Ordering::SeqCst), 0);

    origin.dispose();
    target.dispose();
}

#[test]
fn test_ignored_into_disposed_target_is_silent() {
    let (origin, target) = pair();
    target.dispose();
    let probe = Arc::new(Probe::default());

    let mut scope = origin.lock().unwrap();
    let result = run_ignored::<Double>(&mut scope, &target, (Value::I32(1), probe.clone()));

    assert_eq!(result.unwrap(), Value::Undefined);
    assert_eq!(target.stats().dropped, 1);
    assert_eq!(probe.phase2_runs.load(Ordering::SeqCst), 0);

    drop(scope);
    origin.dispose();
}
