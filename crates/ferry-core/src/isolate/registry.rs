//! Registry of live isolates

use crate::isolate::{Isolate, IsolateId, IsolateOptions, WeakIsolate};
use crate::IsolateResult;
use dashmap::DashMap;

/// Registry of isolates by id
///
/// Entries are weak: the registry never keeps an isolate alive, and lookups
/// of disposed isolates return `None`.
pub struct IsolateRegistry {
    isolates: DashMap<IsolateId, WeakIsolate>,
}

impl IsolateRegistry {
    /// Create a new isolate registry
    pub fn new() -> Self {
        Self {
            isolates: DashMap::new(),
        }
    }

    /// Create an isolate and register it
    pub fn create(&self, options: IsolateOptions) -> IsolateResult<Isolate> {
        let isolate = Isolate::new(options)?;
        self.register(&isolate);
        Ok(isolate)
    }

    /// Register an existing isolate
    pub fn register(&self, isolate: &Isolate) {
        self.isolates.insert(isolate.id(), isolate.downgrade());
    }

    /// Get an isolate by ID
    pub fn get(&self, id: IsolateId) -> Option<Isolate> {
        self.isolates.get(&id).and_then(|weak| weak.upgrade())
    }

    /// Remove an isolate from the registry (does not dispose it)
    pub fn remove(&self, id: IsolateId) -> Option<Isolate> {
        self.isolates.remove(&id).and_then(|(_, weak)| weak.upgrade())
    }

    /// Forget entries whose isolate is gone
    pub fn prune(&self) -> usize {
        let before = self.isolates.len();
        self.isolates.retain(|_, weak| weak.upgrade().is_some());
        before - self.isolates.len()
    }

    /// Dispose every registered isolate and clear the registry
    pub fn dispose_all(&self) {
        let ids = self.all_ids();
        for id in ids {
            if let Some(isolate) = self.remove(id) {
                isolate.dispose();
            }
        }
        self.isolates.clear();
    }

    /// Get the number of registered isolates
    pub fn len(&self) -> usize {
        self.isolates.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get all isolate IDs
    pub fn all_ids(&self) -> Vec<IsolateId> {
        self.isolates.iter().map(|entry| *entry.key()).collect()
    }
}

impl Default for IsolateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
