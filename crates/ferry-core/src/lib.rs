//! Ferry core runtime
//!
//! This crate provides the isolate layer that cross-isolate tasks run on:
//! - Isolates (independently locked execution contexts with a work queue)
//! - Per-isolate heaps with generation-checked handles
//! - Promises (deferred results) living inside an isolate
//! - Call stack capture and async causality tracking
//! - Marshalling of values across isolate boundaries

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod async_context;
pub mod error;
pub mod heap;
pub mod isolate;
pub mod marshal;
pub mod promise;
pub mod remote;
pub mod stack;
pub mod value;

pub use async_context::{AsyncContext, AsyncId};
pub use error::{ErrorKind, IsolateError, RuntimeError};
pub use heap::{HeapObject, Local};
pub use isolate::{
    FailureSink, Isolate, IsolateId, IsolateOptions, IsolateRegistry, IsolateScope, QueueStats,
    Runnable, WeakIsolate,
};
pub use marshal::{marshal, unmarshal, MarshalError, MarshalledValue};
pub use promise::{PromiseState, Resolver};
pub use remote::RemoteHandle;
pub use stack::{CallStack, StackFrame};
pub use value::Value;

/// Result type for operations that touch an isolate
pub type IsolateResult<T> = Result<T, IsolateError>;
