//! Isolate configuration

use crate::error::RuntimeError;
use crate::isolate::IsolateId;
use crate::stack::DEFAULT_STACK_TRACE_LIMIT;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Receives failures of work whose caller asked not to be told about them
///
/// Called on the isolate's worker thread with the id of the isolate the work
/// ran in.
pub type FailureSink = Arc<dyn Fn(IsolateId, &RuntimeError) + Send + Sync>;

/// Options for creating an Isolate
#[derive(Clone)]
pub struct IsolateOptions {
    /// Name used for the worker thread and in logs
    pub name: Option<String>,

    /// Frames captured when asynchronous work is scheduled
    pub stack_trace_limit: usize,

    /// How long an idle worker parks before re-checking its queue
    pub idle_poll: Duration,

    /// Optional receiver for ignored task failures
    pub failure_sink: Option<FailureSink>,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            name: None,
            stack_trace_limit: DEFAULT_STACK_TRACE_LIMIT,
            idle_poll: Duration::from_millis(10),
            failure_sink: None,
        }
    }
}

impl IsolateOptions {
    /// Set the isolate name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the number of frames captured per scheduled task
    pub fn with_stack_trace_limit(mut self, limit: usize) -> Self {
        self.stack_trace_limit = limit;
        self
    }

    /// Set the idle poll interval
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// Install a sink for ignored task failures
    pub fn with_failure_sink(
        mut self,
        sink: impl Fn(IsolateId, &RuntimeError) + Send + Sync + 'static,
    ) -> Self {
        self.failure_sink = Some(Arc::new(sink));
        self
    }
}

impl fmt::Debug for IsolateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateOptions")
            .field("name", &self.name)
            .field("stack_trace_limit", &self.stack_trace_limit)
            .field("idle_poll", &self.idle_poll)
            .field("failure_sink", &self.failure_sink.is_some())
            .finish()
    }
}
