//! Per-isolate object heap
//!
//! Objects are stored in a slot arena. A [`Local`] names a slot together with
//! the generation it was allocated in, so a handle to a released (or reused)
//! slot is detected instead of silently aliasing a different object.

use crate::error::IsolateError;
use crate::isolate::IsolateId;
use crate::promise::PromiseCell;
use crate::value::Value;
use crate::IsolateResult;
use std::collections::BTreeMap;
use std::fmt;

/// Handle to an object in an isolate's heap
///
/// A `Local` is plain data and may be copied anywhere, but it can only be
/// dereferenced through an [`IsolateScope`](crate::IsolateScope) of the
/// isolate that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local {
    isolate: IsolateId,
    slot: u32,
    generation: u32,
}

impl Local {
    /// Isolate that owns the referenced object
    pub fn isolate(&self) -> IsolateId {
        self.isolate
    }

    /// Arena slot index
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation of the slot when the object was allocated
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub(crate) fn from_parts(isolate: IsolateId, slot: u32, generation: u32) -> Self {
        Self {
            isolate,
            slot,
            generation,
        }
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Object({}:{}#{})",
            self.isolate.as_u64(),
            self.slot,
            self.generation
        )
    }
}

/// Error object stored on the heap
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    /// Error class name (`Error`, `TypeError`, ...)
    pub name: String,
    /// Human readable message
    pub message: String,
    /// Formatted stack text, possibly empty
    pub stack: String,
}

/// An object living in an isolate's heap
#[derive(Debug)]
pub enum HeapObject {
    /// Ordered list of values
    Array(Vec<Value>),
    /// String-keyed record
    Record(BTreeMap<String, Value>),
    /// Error object
    Error(ErrorObject),
    /// Promise (deferred result)
    Promise(PromiseCell),
}

impl HeapObject {
    /// Name of the object kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Array(_) => "array",
            HeapObject::Record(_) => "record",
            HeapObject::Error(_) => "error",
            HeapObject::Promise(_) => "promise",
        }
    }
}

struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Slot arena owned by one isolate
pub(crate) struct Heap {
    isolate: IsolateId,
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl Heap {
    pub(crate) fn new(isolate: IsolateId) -> Self {
        Self {
            isolate,
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Allocate an object and return its handle
    pub(crate) fn alloc(&mut self, object: HeapObject) -> Local {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.object = Some(object);
            return Local::from_parts(self.isolate, slot, entry.generation);
        }

        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
        });
        Local::from_parts(self.isolate, slot, 0)
    }

    fn check(&self, local: &Local) -> IsolateResult<usize> {
        if local.isolate != self.isolate {
            return Err(IsolateError::WrongIsolate {
                handle: local.isolate,
                scope: self.isolate,
            });
        }
        let index = local.slot as usize;
        match self.slots.get(index) {
            Some(slot) if slot.generation == local.generation && slot.object.is_some() => {
                Ok(index)
            }
            _ => Err(IsolateError::StaleHandle),
        }
    }

    /// Check that a handle still refers to a live object
    pub(crate) fn contains(&self, local: &Local) -> bool {
        self.check(local).is_ok()
    }

    pub(crate) fn get(&self, local: &Local) -> IsolateResult<&HeapObject> {
        let index = self.check(local)?;
        self.slots[index]
            .object
            .as_ref()
            .ok_or(IsolateError::StaleHandle)
    }

    pub(crate) fn get_mut(&mut self, local: &Local) -> IsolateResult<&mut HeapObject> {
        let index = self.check(local)?;
        self.slots[index]
            .object
            .as_mut()
            .ok_or(IsolateError::StaleHandle)
    }

    /// Free a slot, bumping its generation so old handles go stale
    pub(crate) fn release(&mut self, local: &Local) -> Option<HeapObject> {
        let index = self.check(local).ok()?;
        let slot = &mut self.slots[index];
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(local.slot);
        self.live -= 1;
        object
    }

    /// Number of live objects
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Drop every object, invalidating all outstanding handles
    pub(crate) fn clear(&mut self) -> Vec<HeapObject> {
        let mut dropped = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(object) = slot.object.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                dropped.push(object);
            }
        }
        self.live = 0;
        dropped
    }
}
