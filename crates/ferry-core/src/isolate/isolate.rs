//! Isolate handle and lifecycle
//!
//! An Isolate is an independently locked unit of execution with:
//! - Its own heap (objects, promises, errors)
//! - Its own call stack and async causality state
//! - A work queue drained in order by one dedicated worker thread
//!
//! Holding an [`IsolateScope`] is being "inside" the isolate. At most one
//! thread holds it at a time; the worker takes it for each unit it runs, any
//! other thread can take it with [`Isolate::lock`].

use crate::async_context::AsyncTracker;
use crate::error::IsolateError;
use crate::heap::Heap;
use crate::isolate::queue::{self, FnRunnable, QueueStats, TaskQueue};
use crate::isolate::scope::{self, IsolateScope};
use crate::isolate::{FailureSink, IsolateId, IsolateOptions, Runnable};
use crate::stack::StackFrame;
use crate::IsolateResult;
use crossbeam::sync::Parker;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

/// Everything guarded by the isolate lock
pub(crate) struct IsolateState {
    pub(crate) heap: Heap,
    pub(crate) frames: Vec<StackFrame>,
    pub(crate) async_tracker: AsyncTracker,
}

pub(crate) struct Shared {
    id: IsolateId,
    name: String,
    options: IsolateOptions,
    pub(crate) state: Arc<Mutex<IsolateState>>,
    queue: Arc<TaskQueue>,
    disposed: AtomicBool,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone: let the worker exit and drop whatever is queued.
        self.queue.shutdown();
    }
}

/// Handle to an isolate
///
/// Cloning the handle is cheap; all clones refer to the same isolate.
#[derive(Clone)]
pub struct Isolate {
    pub(crate) shared: Arc<Shared>,
}

impl Isolate {
    /// Create an isolate and start its worker thread
    pub fn new(options: IsolateOptions) -> IsolateResult<Self> {
        let id = IsolateId::new();
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| format!("isolate-{}", id.as_u64()));

        let parker = Parker::new();
        let queue = Arc::new(TaskQueue::new(parker.unparker().clone()));
        let state = IsolateState {
            heap: Heap::new(id),
            frames: Vec::new(),
            async_tracker: AsyncTracker::new(),
        };
        let idle_poll = options.idle_poll;

        let shared = Arc::new(Shared {
            id,
            name,
            options,
            state: Arc::new(Mutex::new(state)),
            queue: queue.clone(),
            disposed: AtomicBool::new(false),
            worker: Mutex::new(None),
        });

        let weak = WeakIsolate {
            id,
            shared: Arc::downgrade(&shared),
        };
        let handle = thread::Builder::new()
            .name(format!("ferry-{}", shared.name))
            .spawn(move || queue::run_loop(id, weak, queue, parker, idle_poll))
            .map_err(|e| IsolateError::WorkerSpawn(e.to_string()))?;
        *shared.worker.lock() = Some(handle);

        tracing::debug!(isolate = %id, name = %shared.name, "isolate created");
        Ok(Self { shared })
    }

    /// Create an isolate with default options
    pub fn with_defaults() -> IsolateResult<Self> {
        Self::new(IsolateOptions::default())
    }

    /// Get the isolate ID
    pub fn id(&self) -> IsolateId {
        self.shared.id
    }

    /// Get the isolate name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Get the options the isolate was created with
    pub fn options(&self) -> &IsolateOptions {
        &self.shared.options
    }

    /// Frames captured when asynchronous work is scheduled from this isolate
    pub fn stack_trace_limit(&self) -> usize {
        self.shared.options.stack_trace_limit
    }

    /// Sink for ignored task failures, if configured
    pub fn failure_sink(&self) -> Option<&FailureSink> {
        self.shared.options.failure_sink.as_ref()
    }

    /// Whether [`dispose`](Self::dispose) has been called
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same isolate
    pub fn same(&self, other: &Isolate) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Create a weak handle that does not keep the isolate alive
    pub fn downgrade(&self) -> WeakIsolate {
        WeakIsolate {
            id: self.shared.id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Enter the isolate from the calling thread, blocking until it is free
    ///
    /// Fails if the isolate is disposed (before or while waiting) or if the
    /// calling thread is already inside it.
    pub fn lock(&self) -> IsolateResult<IsolateScope> {
        IsolateScope::enter(self)
    }

    /// Enqueue a unit onto the isolate's work queue
    ///
    /// `urgent` units run before all non-urgent ones. With `wake` the worker
    /// is woken immediately, otherwise the unit waits for the worker's next
    /// wake-up. On a disposed isolate the unit is dropped without running.
    pub fn schedule_task(&self, unit: Box<dyn Runnable>, urgent: bool, wake: bool) {
        if self.is_disposed() {
            tracing::debug!(isolate = %self.id(), "dropping unit scheduled on disposed isolate");
            self.shared.queue.record_dropped();
            drop(unit);
            return;
        }

        self.shared.queue.push(unit, urgent);
        if wake {
            self.shared.queue.wake();
        }

        // Raced with dispose: nobody will run it now.
        if self.is_disposed() {
            self.shared.queue.drain();
        }
    }

    /// Schedule a closure to run inside the isolate
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut IsolateScope) + Send + 'static,
    {
        self.schedule_task(Box::new(FnRunnable(f)), false, true);
    }

    /// Queue counters
    pub fn stats(&self) -> QueueStats {
        self.shared.queue.stats()
    }

    /// Dispose the isolate
    ///
    /// Stops the worker, drops queued units without running them and frees
    /// the heap, which invalidates every handle into it. Idempotent. Called
    /// from inside any isolate it never waits for a running unit; the heap is
    /// then freed as that unit's scope exits.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(isolate = %self.id(), "disposing isolate");

        self.shared.queue.shutdown();
        let worker = self.shared.worker.lock().take();
        if let Some(handle) = worker {
            // The worker may be waiting for a lock this thread holds; only
            // join from threads that are outside every isolate.
            if handle.thread().id() != thread::current().id() && scope::current_isolate().is_none()
            {
                let _ = handle.join();
            }
        }

        let dropped = self.shared.queue.drain();
        if dropped > 0 {
            tracing::debug!(isolate = %self.id(), dropped, "dropped queued units on dispose");
        }

        // Inside an isolate, waiting here could deadlock against a unit
        // blocked on that isolate. Whoever holds the lock frees the heap as
        // its scope exits.
        let state = if scope::current_isolate().is_none() {
            Some(self.shared.state.lock())
        } else {
            self.shared.state.try_lock()
        };
        if let Some(mut state) = state {
            let objects = state.heap.clear();
            drop(state);
            drop(objects);
        }
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Weak handle to an isolate
///
/// Upgrading fails once the isolate is disposed or all strong handles are
/// gone, which is how remote references detect a vanished isolate.
#[derive(Clone)]
pub struct WeakIsolate {
    id: IsolateId,
    shared: Weak<Shared>,
}

impl WeakIsolate {
    /// Id of the referenced isolate
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Get a strong handle if the isolate is still alive
    pub fn upgrade(&self) -> Option<Isolate> {
        let shared = self.shared.upgrade()?;
        if shared.disposed.load(Ordering::Acquire) {
            return None;
        }
        Some(Isolate { shared })
    }
}

impl fmt::Debug for WeakIsolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakIsolate").field("id", &self.id).finish()
    }
}
