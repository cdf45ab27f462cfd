//! Isolates: locking, work queues and lifecycle

mod id;
#[allow(clippy::module_inception)]
mod isolate;
mod options;
mod queue;
mod registry;
mod scope;

pub use id::IsolateId;
pub use isolate::{Isolate, WeakIsolate};
pub use options::{FailureSink, IsolateOptions};
pub use queue::{QueueStats, Runnable};
pub use registry::IsolateRegistry;
pub use scope::{current_isolate, IsolateScope};
