//! Scoped access to an isolate
//!
//! An [`IsolateScope`] is the isolate lock. Every operation on the isolate's
//! heap, promises, frames and async state goes through it.

use crate::async_context::AsyncContext;
use crate::error::IsolateError;
use crate::heap::{ErrorObject, HeapObject, Local};
use crate::isolate::isolate::IsolateState;
use crate::isolate::{Isolate, IsolateId};
use crate::promise::{PromiseCell, PromiseState, Reaction, Resolver};
use crate::remote::RemoteHandle;
use crate::stack::{CallStack, StackFrame};
use crate::value::Value;
use crate::IsolateResult;
use parking_lot::{ArcMutexGuard, RawMutex};
use std::cell::RefCell;
use std::collections::BTreeMap;

thread_local! {
    static ENTERED: RefCell<Vec<IsolateId>> = const { RefCell::new(Vec::new()) };
}

/// Whether the calling thread is inside the given isolate
pub(crate) fn is_entered(id: IsolateId) -> bool {
    ENTERED.with(|entered| entered.borrow().contains(&id))
}

/// Innermost isolate the calling thread is inside, if any
pub fn current_isolate() -> Option<IsolateId> {
    ENTERED.with(|entered| entered.borrow().last().copied())
}

/// Exclusive access to an isolate, held by the current thread
pub struct IsolateScope {
    isolate: Isolate,
    state: ArcMutexGuard<RawMutex, IsolateState>,
}

impl IsolateScope {
    pub(crate) fn enter(isolate: &Isolate) -> IsolateResult<Self> {
        let id = isolate.id();
        if isolate.is_disposed() {
            return Err(IsolateError::Disposed(id));
        }
        if is_entered(id) {
            return Err(IsolateError::AlreadyEntered(id));
        }

        let state = isolate.shared.state.lock_arc();
        if isolate.is_disposed() {
            return Err(IsolateError::Disposed(id));
        }

        ENTERED.with(|entered| entered.borrow_mut().push(id));
        Ok(Self {
            isolate: isolate.clone(),
            state,
        })
    }

    /// Id of the isolate this scope is inside
    pub fn id(&self) -> IsolateId {
        self.isolate.id()
    }

    /// Handle to the isolate this scope is inside
    pub fn isolate(&self) -> &Isolate {
        &self.isolate
    }

    // ── Heap ────────────────────────────────────────────────────────────

    /// Whether `local` refers to a live object of this isolate
    pub fn contains(&self, local: &Local) -> bool {
        self.state.heap.contains(local)
    }

    /// Number of live heap objects
    pub fn heap_len(&self) -> usize {
        self.state.heap.len()
    }

    /// Borrow the heap object behind a handle
    pub fn object(&self, local: &Local) -> IsolateResult<&HeapObject> {
        self.state.heap.get(local)
    }

    fn expect_object(value: &Value) -> IsolateResult<Local> {
        value.as_object().ok_or(IsolateError::UnexpectedObject {
            expected: "object",
            found: value.type_name(),
        })
    }

    fn object_mut(&mut self, value: &Value) -> IsolateResult<&mut HeapObject> {
        let local = Self::expect_object(value)?;
        self.state.heap.get_mut(&local)
    }

    /// Allocate an array
    pub fn new_array(&mut self, items: Vec<Value>) -> Value {
        Value::Object(self.state.heap.alloc(HeapObject::Array(items)))
    }

    /// Allocate a record
    pub fn new_record<I>(&mut self, fields: I) -> Value
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let fields: BTreeMap<String, Value> = fields.into_iter().collect();
        Value::Object(self.state.heap.alloc(HeapObject::Record(fields)))
    }

    /// Allocate an error object
    pub fn new_error(&mut self, name: &str, message: &str, stack: &str) -> Value {
        Value::Object(self.state.heap.alloc(HeapObject::Error(ErrorObject {
            name: name.to_string(),
            message: message.to_string(),
            stack: stack.to_string(),
        })))
    }

    /// Copy out the elements of an array
    pub fn array_items(&self, value: &Value) -> IsolateResult<Vec<Value>> {
        match self.object(&Self::expect_object(value)?)? {
            HeapObject::Array(items) => Ok(items.clone()),
            other => Err(IsolateError::UnexpectedObject {
                expected: "array",
                found: other.kind_name(),
            }),
        }
    }

    /// Append to an array
    pub fn push(&mut self, array: &Value, item: Value) -> IsolateResult<()> {
        match self.object_mut(array)? {
            HeapObject::Array(items) => {
                items.push(item);
                Ok(())
            }
            other => Err(IsolateError::UnexpectedObject {
                expected: "array",
                found: other.kind_name(),
            }),
        }
    }

    /// Copy out the fields of a record
    pub fn record_entries(&self, value: &Value) -> IsolateResult<Vec<(String, Value)>> {
        match self.object(&Self::expect_object(value)?)? {
            HeapObject::Record(fields) => Ok(fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            other => Err(IsolateError::UnexpectedObject {
                expected: "record",
                found: other.kind_name(),
            }),
        }
    }

    /// Read one field of a record
    pub fn get_field(&self, record: &Value, key: &str) -> IsolateResult<Option<Value>> {
        match self.object(&Self::expect_object(record)?)? {
            HeapObject::Record(fields) => Ok(fields.get(key).cloned()),
            other => Err(IsolateError::UnexpectedObject {
                expected: "record",
                found: other.kind_name(),
            }),
        }
    }

    /// Set one field of a record
    pub fn set_field(&mut self, record: &Value, key: &str, value: Value) -> IsolateResult<()> {
        match self.object_mut(record)? {
            HeapObject::Record(fields) => {
                fields.insert(key.to_string(), value);
                Ok(())
            }
            other => Err(IsolateError::UnexpectedObject {
                expected: "record",
                found: other.kind_name(),
            }),
        }
    }

    /// Copy out an error object
    pub fn error_object(&self, value: &Value) -> IsolateResult<ErrorObject> {
        match self.object(&Self::expect_object(value)?)? {
            HeapObject::Error(error) => Ok(error.clone()),
            other => Err(IsolateError::UnexpectedObject {
                expected: "error",
                found: other.kind_name(),
            }),
        }
    }

    /// Free a heap object; returns whether it was live
    pub fn release(&mut self, value: &Value) -> bool {
        match value.as_object() {
            Some(local) => self.state.heap.release(&local).is_some(),
            None => false,
        }
    }

    /// Create a remote handle to a heap object of this isolate
    pub fn remote(&self, value: &Value) -> IsolateResult<RemoteHandle> {
        let local = Self::expect_object(value)?;
        self.state.heap.get(&local)?;
        Ok(RemoteHandle::new(self.isolate.downgrade(), local))
    }

    // ── Promises ────────────────────────────────────────────────────────

    /// Create a pending promise and the resolver that settles it
    pub fn create_deferred(&mut self) -> (Value, Resolver) {
        let local = self
            .state
            .heap
            .alloc(HeapObject::Promise(PromiseCell::new()));
        let resolver = Resolver::new(RemoteHandle::new(self.isolate.downgrade(), local));
        (Value::Object(local), resolver)
    }

    /// Fulfil a promise; returns false if it could not be settled
    pub fn resolve(&mut self, resolver: &Resolver, value: Value) -> bool {
        self.settle(resolver, Ok(value))
    }

    /// Reject a promise; returns false if it could not be settled
    pub fn reject(&mut self, resolver: &Resolver, reason: Value) -> bool {
        self.settle(resolver, Err(reason))
    }

    fn settle(&mut self, resolver: &Resolver, outcome: Result<Value, Value>) -> bool {
        let local = match resolver.handle().to_local(self) {
            Ok(local) => local,
            Err(err) => {
                tracing::trace!(isolate = %self.id(), error = %err, "resolver no longer valid");
                return false;
            }
        };

        let reactions = match self.state.heap.get_mut(&local) {
            Ok(HeapObject::Promise(cell)) => match cell.settle(outcome.clone()) {
                Some(reactions) => reactions,
                None => return false,
            },
            _ => return false,
        };

        for reaction in reactions {
            reaction(self, outcome.clone());
        }
        true
    }

    /// Current state of a promise
    pub fn promise_state(&self, promise: &Value) -> IsolateResult<PromiseState> {
        match self.object(&Self::expect_object(promise)?)? {
            HeapObject::Promise(cell) => Ok(cell.state().clone()),
            other => Err(IsolateError::UnexpectedObject {
                expected: "promise",
                found: other.kind_name(),
            }),
        }
    }

    /// Run `f` when the promise settles (immediately if it already has)
    ///
    /// `f` receives `Ok(value)` on fulfilment and `Err(reason)` on rejection,
    /// and always runs inside this isolate.
    pub fn on_settled<F>(&mut self, promise: &Value, f: F) -> IsolateResult<()>
    where
        F: FnOnce(&mut IsolateScope, Result<Value, Value>) + Send + 'static,
    {
        let reaction: Reaction = Box::new(f);
        let ready = match self.object_mut(promise)? {
            HeapObject::Promise(cell) => cell.subscribe(reaction),
            other => {
                return Err(IsolateError::UnexpectedObject {
                    expected: "promise",
                    found: other.kind_name(),
                })
            }
        };

        if let Some((reaction, outcome)) = ready {
            reaction(self, outcome);
        }
        Ok(())
    }

    // ── Call stack ──────────────────────────────────────────────────────

    /// Run `f` with a frame pushed on this isolate's call stack
    pub fn with_frame<R>(
        &mut self,
        function: &str,
        location: Option<&str>,
        f: impl FnOnce(&mut IsolateScope) -> R,
    ) -> R {
        let depth = self.state.frames.len();
        self.state.frames.push(StackFrame::new(function, location));
        let guard = Restore::new(self, move |state: &mut IsolateState| {
            state.frames.truncate(depth)
        });
        guard.run(f)
    }

    /// Snapshot up to `limit` frames, innermost first
    pub fn capture_call_stack(&self, limit: usize) -> CallStack {
        CallStack::capture(&self.state.frames, limit)
    }

    // ── Async causality ─────────────────────────────────────────────────

    /// Context of the operation currently executing
    pub fn current_async_context(&self) -> AsyncContext {
        self.state.async_tracker.current()
    }

    /// Mint a context for a new operation triggered by the current one
    pub fn new_async_context(&mut self) -> AsyncContext {
        self.state.async_tracker.mint()
    }

    /// Run `f` as part of the operation identified by `ctx`
    pub fn with_async_context<R>(
        &mut self,
        ctx: AsyncContext,
        f: impl FnOnce(&mut IsolateScope) -> R,
    ) -> R {
        let previous = self.state.async_tracker.replace(ctx);
        let guard = Restore::new(self, move |state: &mut IsolateState| {
            state.async_tracker.replace(previous);
        });
        guard.run(f)
    }
}

/// Undoes a scoped change to isolate state when dropped, including on unwind
struct Restore<'a, F: FnOnce(&mut IsolateState)> {
    scope: &'a mut IsolateScope,
    undo: Option<F>,
}

impl<'a, F: FnOnce(&mut IsolateState)> Restore<'a, F> {
    fn new(scope: &'a mut IsolateScope, undo: F) -> Self {
        Self {
            scope,
            undo: Some(undo),
        }
    }

    fn run<R>(mut self, f: impl FnOnce(&mut IsolateScope) -> R) -> R {
        f(&mut *self.scope)
    }
}

impl<F: FnOnce(&mut IsolateState)> Drop for Restore<'_, F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo(&mut *self.scope.state);
        }
    }
}

impl Drop for IsolateScope {
    fn drop(&mut self) {
        let id = self.isolate.id();
        ENTERED.with(|entered| {
            let mut entered = entered.borrow_mut();
            if let Some(pos) = entered.iter().rposition(|e| *e == id) {
                entered.remove(pos);
            }
        });

        // Disposed from inside: free the heap on the way out.
        if self.isolate.is_disposed() {
            let objects = self.state.heap.clear();
            drop(objects);
        }
    }
}
