//! Generation-checked references into another isolate's heap

use crate::error::IsolateError;
use crate::heap::Local;
use crate::isolate::{IsolateId, IsolateScope, WeakIsolate};
use crate::IsolateResult;

/// Reference to an object that may be held outside its isolate
///
/// A remote handle never keeps its isolate alive. It can be moved to any
/// thread, but turning it back into a [`Local`] requires a scope of the owning
/// isolate and succeeds only while the isolate is alive and the object has not
/// been released.
#[derive(Debug, Clone)]
pub struct RemoteHandle {
    isolate: WeakIsolate,
    local: Local,
}

impl RemoteHandle {
    pub(crate) fn new(isolate: WeakIsolate, local: Local) -> Self {
        Self { isolate, local }
    }

    /// Isolate owning the referenced object
    pub fn isolate_id(&self) -> IsolateId {
        self.local.isolate()
    }

    /// Whether the owning isolate is still alive
    pub fn is_alive(&self) -> bool {
        self.isolate.upgrade().is_some()
    }

    /// Validate the handle against `scope` and return the local handle
    pub fn to_local(&self, scope: &IsolateScope) -> IsolateResult<Local> {
        if scope.id() != self.local.isolate() {
            return Err(IsolateError::WrongIsolate {
                handle: self.local.isolate(),
                scope: scope.id(),
            });
        }
        if !self.is_alive() {
            return Err(IsolateError::Disposed(self.local.isolate()));
        }
        if !scope.contains(&self.local) {
            return Err(IsolateError::StaleHandle);
        }
        Ok(self.local)
    }
}
