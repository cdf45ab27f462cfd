//! The three-phase contract and execution modes

use ferry_core::{IsolateScope, RuntimeError, Value};
use std::fmt;
use std::str::FromStr;

/// Phases 2 and 3 of a cross-isolate operation
///
/// A task is built by Phase 1 ([`TaskFactory::construct`]) and holds only
/// isolate-independent data, which is why it must be `Send`: it is handed to
/// the target isolate's worker and then back to the origin.
pub trait ThreePhaseTask: Send + 'static {
    /// Run the work inside the target isolate
    ///
    /// Called exactly once, with the target locked. The outcome is kept
    /// inside the task for Phase 3; an error is delivered instead of running
    /// Phase 3.
    fn phase2(&mut self, scope: &mut IsolateScope) -> Result<(), RuntimeError>;

    /// Convert the Phase 2 outcome into a value of the origin isolate
    ///
    /// Called at most once, with the origin locked, and only after a
    /// successful Phase 2 when the caller asked for a result.
    fn phase3(self: Box<Self>, scope: &mut IsolateScope) -> Result<Value, RuntimeError>;
}

/// Phase 1: build a task from origin arguments
pub trait TaskFactory: ThreePhaseTask + Sized {
    /// Arguments as seen by the origin isolate
    type Args;

    /// Validate `args` and copy them out of the origin heap
    ///
    /// Runs on the calling thread with the origin locked. Must not keep any
    /// `Local` of the origin around for later phases.
    fn construct(scope: &mut IsolateScope, args: Self::Args) -> Result<Self, RuntimeError>;
}

/// How the caller wants the result delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunMode {
    /// Block until the result is available
    #[default]
    Sync,
    /// Return a promise settled once the work completes
    Async,
    /// Schedule the work and return immediately, discarding the result
    AsyncIgnored,
}

impl RunMode {
    /// Short name, as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Sync => "sync",
            RunMode::Async => "async",
            RunMode::AsyncIgnored => "ignored",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown run mode name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseRunModeError(String);

impl fmt::Display for ParseRunModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown run mode '{}' (expected sync, async or ignored)",
            self.0
        )
    }
}

impl std::error::Error for ParseRunModeError {}

impl FromStr for RunMode {
    type Err = ParseRunModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(RunMode::Sync),
            "async" => Ok(RunMode::Async),
            "ignored" | "async-ignored" | "async_ignored" => Ok(RunMode::AsyncIgnored),
            _ => Err(ParseRunModeError(s.to_string())),
        }
    }
}
