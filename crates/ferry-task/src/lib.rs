//! Three-phase cross-isolate tasks
//!
//! Most operations that reach from one isolate into another decompose into
//! three phases:
//!
//! - Phase 1 (origin isolate): validate the arguments and copy everything the
//!   work needs out of the origin heap
//! - Phase 2 (target isolate): copy the data in, do the work, copy the
//!   result out
//! - Phase 3 (origin isolate): turn the copied result into an origin value
//!
//! A task type implements the phases once ([`ThreePhaseTask`] plus
//! [`TaskFactory`]); [`run`] then executes it synchronously, asynchronously
//! with a promise, or fire-and-forget, handling all locking and scheduling.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod capsule;
mod run;
mod runner;
mod sync;
mod task;

pub use capsule::ResumeCapsule;
pub use run::{run, run_async, run_ignored};
pub use sync::run_sync;
pub use task::{ParseRunModeError, RunMode, TaskFactory, ThreePhaseTask};
