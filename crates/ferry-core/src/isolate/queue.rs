//! Isolate work queue and worker thread

use crate::isolate::{Isolate, IsolateId, IsolateScope, WeakIsolate};
use crossbeam::sync::{Parker, Unparker};
use crossbeam_deque::{Injector, Steal};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A unit of work an isolate's queue executes at most once
///
/// `run` is called on the isolate's worker thread with the isolate locked.
/// A unit that is dropped without being run (its isolate was disposed while
/// it was queued) sees only its destructor; units with obligations must
/// handle that case in `Drop`.
pub trait Runnable: Send {
    /// Execute the unit inside its isolate
    fn run(self: Box<Self>, scope: &mut IsolateScope);
}

/// Adapter that lets a closure be scheduled as a unit
pub(crate) struct FnRunnable<F>(pub(crate) F);

impl<F> Runnable for FnRunnable<F>
where
    F: FnOnce(&mut IsolateScope) + Send,
{
    fn run(self: Box<Self>, scope: &mut IsolateScope) {
        (self.0)(scope)
    }
}

pub(crate) type Unit = Box<dyn Runnable>;

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Units accepted by `schedule_task`
    pub scheduled: u64,
    /// Units that ran to completion (or panicked)
    pub executed: u64,
    /// Units dropped without running
    pub dropped: u64,
}

impl QueueStats {
    /// Units accepted but neither executed nor dropped yet
    pub fn pending(&self) -> u64 {
        self.scheduled
            .saturating_sub(self.executed)
            .saturating_sub(self.dropped)
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    scheduled: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
}

/// Two-lane FIFO queue drained by one worker
pub(crate) struct TaskQueue {
    urgent: Injector<Unit>,
    normal: Injector<Unit>,
    unparker: Unparker,
    shutdown: AtomicBool,
    counters: QueueCounters,
}

impl TaskQueue {
    pub(crate) fn new(unparker: Unparker) -> Self {
        Self {
            urgent: Injector::new(),
            normal: Injector::new(),
            unparker,
            shutdown: AtomicBool::new(false),
            counters: QueueCounters::default(),
        }
    }

    pub(crate) fn push(&self, unit: Unit, urgent: bool) {
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        if urgent {
            self.urgent.push(unit);
        } else {
            self.normal.push(unit);
        }
    }

    /// Pop the next unit: urgent lane first, then normal lane
    pub(crate) fn pop(&self) -> Option<Unit> {
        Self::steal(&self.urgent).or_else(|| Self::steal(&self.normal))
    }

    fn steal(injector: &Injector<Unit>) -> Option<Unit> {
        loop {
            match injector.steal() {
                Steal::Success(unit) => return Some(unit),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn wake(&self) {
        self.unparker.unpark();
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.unparker.unpark();
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn record_dropped(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_executed(&self) {
        self.counters.executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every queued unit without running it
    pub(crate) fn drain(&self) -> usize {
        let mut count = 0;
        while let Some(unit) = self.pop() {
            self.record_dropped();
            drop(unit);
            count += 1;
        }
        count
    }

    pub(crate) fn stats(&self) -> QueueStats {
        QueueStats {
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Worker thread main loop
///
/// Holds only a weak reference to its isolate between units, so an isolate
/// whose handles are all gone shuts its worker down.
pub(crate) fn run_loop(
    id: IsolateId,
    isolate: WeakIsolate,
    queue: std::sync::Arc<TaskQueue>,
    parker: Parker,
    idle_poll: Duration,
) {
    loop {
        if queue.is_shutdown() {
            break;
        }

        let unit = match queue.pop() {
            Some(unit) => unit,
            None => {
                parker.park_timeout(idle_poll);
                continue;
            }
        };

        let Some(isolate) = isolate.upgrade() else {
            queue.record_dropped();
            drop(unit);
            break;
        };

        execute(&isolate, &queue, unit);
    }

    let dropped = queue.drain();
    tracing::debug!(isolate = %id, dropped, "isolate worker shutting down");
}

fn execute(isolate: &Isolate, queue: &TaskQueue, unit: Unit) {
    let mut scope = match isolate.lock() {
        Ok(scope) => scope,
        Err(err) => {
            tracing::debug!(
                isolate = %isolate.id(),
                error = %err,
                "dropping unit, isolate unavailable"
            );
            queue.record_dropped();
            drop(unit);
            return;
        }
    };

    tracing::trace!(isolate = %isolate.id(), "running unit");
    let result = panic::catch_unwind(AssertUnwindSafe(|| unit.run(&mut scope)));
    queue.record_executed();

    if let Err(payload) = result {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::warn!(isolate = %isolate.id(), panic = %message, "unit panicked");
    }
}
