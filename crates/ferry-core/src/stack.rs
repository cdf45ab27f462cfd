//! Call stack snapshots
//!
//! Each isolate keeps the list of frames guest code is currently executing.
//! A [`CallStack`] is a detached copy of the top of that list, used to keep
//! diagnostic continuity when work hops to another isolate and back.

use std::fmt;

/// Default number of frames captured when scheduling asynchronous work
pub const DEFAULT_STACK_TRACE_LIMIT: usize = 10;

/// One frame of a call stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Function name
    pub function: String,
    /// Source location, if known
    pub location: Option<String>,
}

impl StackFrame {
    /// Create a frame
    pub fn new(function: impl Into<String>, location: Option<&str>) -> Self {
        Self {
            function: function.into(),
            location: location.map(str::to_string),
        }
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "    at {} ({})", self.function, location),
            None => write!(f, "    at {}", self.function),
        }
    }
}

/// Snapshot of a call stack, innermost frame first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<StackFrame>,
}

impl CallStack {
    /// Build a snapshot from frames ordered innermost first
    pub fn from_frames(frames: Vec<StackFrame>) -> Self {
        Self { frames }
    }

    /// Capture up to `limit` frames from an outermost-first frame list
    pub(crate) fn capture(active: &[StackFrame], limit: usize) -> Self {
        Self {
            frames: active.iter().rev().take(limit).cloned().collect(),
        }
    }

    /// Frames, innermost first
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Number of captured frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether nothing was captured
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", frame)?;
        }
        Ok(())
    }
}
