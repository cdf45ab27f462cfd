//! Promises (deferred results)
//!
//! A promise lives in its isolate's heap. The [`Resolver`] that settles it is
//! a remote handle, so it can travel with work scheduled on other isolates
//! and be used once control is back inside the owning isolate.

use crate::isolate::{IsolateId, IsolateScope};
use crate::remote::RemoteHandle;
use crate::value::Value;
use std::fmt;

/// Callback run when a promise settles, under the owning isolate's lock
pub type Reaction = Box<dyn FnOnce(&mut IsolateScope, Result<Value, Value>) + Send>;

/// Observable state of a promise
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState {
    /// Not settled yet
    Pending,
    /// Settled with a value
    Fulfilled(Value),
    /// Settled with a rejection reason
    Rejected(Value),
}

impl PromiseState {
    /// Whether the promise has settled
    pub fn is_settled(&self) -> bool {
        !matches!(self, PromiseState::Pending)
    }
}

/// Heap storage of a promise
pub struct PromiseCell {
    state: PromiseState,
    reactions: Vec<Reaction>,
}

impl PromiseCell {
    pub(crate) fn new() -> Self {
        Self {
            state: PromiseState::Pending,
            reactions: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> &PromiseState {
        &self.state
    }

    /// Settle the promise, returning the reactions to run
    ///
    /// Returns `None` if the promise was already settled.
    pub(crate) fn settle(&mut self, outcome: Result<Value, Value>) -> Option<Vec<Reaction>> {
        if self.state.is_settled() {
            return None;
        }
        self.state = match outcome {
            Ok(value) => PromiseState::Fulfilled(value),
            Err(reason) => PromiseState::Rejected(reason),
        };
        Some(std::mem::take(&mut self.reactions))
    }

    /// Queue a reaction, or hand it back if the promise already settled
    pub(crate) fn subscribe(
        &mut self,
        reaction: Reaction,
    ) -> Option<(Reaction, Result<Value, Value>)> {
        match &self.state {
            PromiseState::Pending => {
                self.reactions.push(reaction);
                None
            }
            PromiseState::Fulfilled(value) => Some((reaction, Ok(value.clone()))),
            PromiseState::Rejected(reason) => Some((reaction, Err(reason.clone()))),
        }
    }
}

impl fmt::Debug for PromiseCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseCell")
            .field("state", &self.state)
            .field("reactions", &self.reactions.len())
            .finish()
    }
}

/// Capability to settle one promise
///
/// Not `Clone`: a promise has exactly one resolver.
#[derive(Debug)]
pub struct Resolver {
    handle: RemoteHandle,
}

impl Resolver {
    pub(crate) fn new(handle: RemoteHandle) -> Self {
        Self { handle }
    }

    /// Isolate owning the promise
    pub fn isolate_id(&self) -> IsolateId {
        self.handle.isolate_id()
    }

    /// Whether the owning isolate is still alive
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// Remote handle to the promise
    pub fn handle(&self) -> &RemoteHandle {
        &self.handle
    }
}
