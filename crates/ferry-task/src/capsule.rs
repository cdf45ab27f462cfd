//! References back into the origin isolate
//!
//! A [`ResumeCapsule`] travels with an asynchronous task to the target
//! isolate and back. It holds nothing that keeps the origin alive: the
//! resolver is a generation-checked remote handle and the isolate reference
//! is weak, so a capsule whose origin was disposed degrades to a no-op.

use ferry_core::{
    AsyncContext, CallStack, Isolate, IsolateId, IsolateScope, Resolver, RuntimeError, Value,
    WeakIsolate,
};

/// Everything needed to deliver a result into the origin isolate later
#[derive(Debug)]
pub struct ResumeCapsule {
    resolver: Resolver,
    origin: WeakIsolate,
    stack: CallStack,
    async_context: AsyncContext,
}

impl ResumeCapsule {
    /// Create the pending promise for an asynchronous call
    ///
    /// Also snapshots the caller's stack (up to the origin's
    /// `stack_trace_limit` frames) and mints the async context the result
    /// will be delivered in. Returns the promise to hand to the caller.
    pub fn new(scope: &mut IsolateScope) -> (Value, Self) {
        let (promise, resolver) = scope.create_deferred();
        let limit = scope.isolate().stack_trace_limit();
        let capsule = Self {
            resolver,
            origin: scope.isolate().downgrade(),
            stack: scope.capture_call_stack(limit),
            async_context: scope.new_async_context(),
        };
        (promise, capsule)
    }

    /// Id of the origin isolate
    pub fn origin_id(&self) -> IsolateId {
        self.origin.id()
    }

    /// The origin isolate, unless it has been disposed
    pub fn origin(&self) -> Option<Isolate> {
        self.origin.upgrade()
    }

    /// Stack of the call that created the capsule
    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Context the result is delivered in
    pub fn async_context(&self) -> AsyncContext {
        self.async_context
    }

    /// Settle the promise with the outcome produced by `deliver`
    ///
    /// `deliver` runs only if `scope` is the origin and the promise is still
    /// there, inside the captured async context. Errors are materialised as
    /// origin values before rejecting. Returns whether the promise was
    /// settled.
    pub fn settle<F>(self, scope: &mut IsolateScope, deliver: F) -> bool
    where
        F: FnOnce(&mut IsolateScope) -> Result<Value, RuntimeError>,
    {
        if let Err(err) = self.resolver.handle().to_local(scope) {
            tracing::trace!(
                origin = %self.origin.id(),
                scope = %scope.id(),
                error = %err,
                "capsule no longer valid, dropping result"
            );
            return false;
        }

        let resolver = self.resolver;
        scope.with_async_context(self.async_context, move |scope| match deliver(scope) {
            Ok(value) => scope.resolve(&resolver, value),
            Err(err) => {
                let reason = err.into_value(scope);
                scope.reject(&resolver, reason)
            }
        })
    }
}
