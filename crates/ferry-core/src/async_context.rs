//! Async causality tracking
//!
//! Every isolate numbers the asynchronous operations it starts. When work is
//! scheduled, the caller mints a new [`AsyncContext`] whose trigger is the
//! context that was executing at the time; when the result is delivered, the
//! delivering code runs inside that context, so tracing can link the two.

use std::fmt;

/// Identifier of an asynchronous operation within one isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsyncId(u64);

impl AsyncId {
    /// Id of the isolate's top-level execution
    pub const ROOT: AsyncId = AsyncId(1);

    /// Id meaning "no trigger"
    pub const NONE: AsyncId = AsyncId(0);

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AsyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Causality token: which operation this is and which one started it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncContext {
    /// This operation
    pub async_id: AsyncId,
    /// The operation that was executing when this one was created
    pub trigger_id: AsyncId,
}

impl AsyncContext {
    /// Context of an isolate's top-level execution
    pub const fn root() -> Self {
        Self {
            async_id: AsyncId::ROOT,
            trigger_id: AsyncId::NONE,
        }
    }
}

impl Default for AsyncContext {
    fn default() -> Self {
        Self::root()
    }
}

/// Per-isolate async id allocator and current context
#[derive(Debug)]
pub(crate) struct AsyncTracker {
    next_id: u64,
    current: AsyncContext,
}

impl AsyncTracker {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AsyncId::ROOT.0 + 1,
            current: AsyncContext::root(),
        }
    }

    pub(crate) fn current(&self) -> AsyncContext {
        self.current
    }

    /// Mint a context triggered by the current one
    pub(crate) fn mint(&mut self) -> AsyncContext {
        let async_id = AsyncId(self.next_id);
        self.next_id += 1;
        AsyncContext {
            async_id,
            trigger_id: self.current.async_id,
        }
    }

    /// Make `ctx` current, returning the previous context
    pub(crate) fn replace(&mut self, ctx: AsyncContext) -> AsyncContext {
        std::mem::replace(&mut self.current, ctx)
    }
}
