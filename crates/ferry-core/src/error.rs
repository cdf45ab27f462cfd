//! Error types
//!
//! [`IsolateError`] describes misuse of the isolate layer (locking a disposed
//! isolate, dereferencing a stale handle). [`RuntimeError`] is the
//! isolate-independent error that crosses isolate boundaries: it carries no
//! handles, only copied data, so it can be produced in one isolate and
//! delivered in another.

use crate::isolate::{IsolateId, IsolateScope};
use crate::marshal::{self, MarshalError, MarshalledValue};
use crate::stack::CallStack;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Message used whenever work cannot run because its isolate is gone
pub const ISOLATE_DISPOSED: &str = "Isolate is disposed";

/// Errors raised by the isolate layer itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsolateError {
    /// The isolate has been disposed
    #[error("Isolate {0} is disposed")]
    Disposed(IsolateId),

    /// The calling thread is already inside this isolate
    #[error("Isolate {0} is already entered on this thread")]
    AlreadyEntered(IsolateId),

    /// A handle was used with a scope of a different isolate
    #[error("Handle belongs to isolate {handle}, but scope is isolate {scope}")]
    WrongIsolate {
        /// Isolate that owns the handle
        handle: IsolateId,
        /// Isolate of the scope it was used with
        scope: IsolateId,
    },

    /// The handle's slot was released or the isolate was cleared
    #[error("Stale handle")]
    StaleHandle,

    /// A heap object had a different kind than expected
    #[error("Expected {expected}, found {found}")]
    UnexpectedObject {
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
    },

    /// The isolate's worker thread could not be started
    #[error("Failed to spawn isolate worker: {0}")]
    WorkerSpawn(String),
}

/// Class of a [`RuntimeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Generic error
    Error,
    /// Wrong type of argument or value
    TypeError,
    /// Argument out of range
    RangeError,
    /// Guest code threw a value
    Thrown,
}

impl ErrorKind {
    /// Error class name as seen by guest code
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::Error | ErrorKind::Thrown => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Isolate-independent runtime error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct RuntimeError {
    kind: ErrorKind,
    message: String,
    thrown: Option<MarshalledValue>,
    stack: String,
}

impl RuntimeError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            thrown: None,
            stack: String::new(),
        }
    }

    /// Generic `Error`
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Error, message)
    }

    /// `TypeError`
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    /// `RangeError`
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeError, message)
    }

    /// The isolate that should run the work no longer exists
    pub fn isolate_disposed() -> Self {
        Self::error(ISOLATE_DISPOSED)
    }

    /// A value thrown by guest code, already copied out of its isolate
    pub fn thrown(value: MarshalledValue) -> Self {
        let message = match &value {
            MarshalledValue::Error { message, .. } => message.clone(),
            other => other.to_string(),
        };
        let stack = match &value {
            MarshalledValue::Error { stack, .. } => stack.clone(),
            _ => String::new(),
        };
        Self {
            kind: ErrorKind::Thrown,
            message,
            thrown: Some(value),
            stack,
        }
    }

    /// Copy a guest value out of `scope` and wrap it as a thrown error
    pub fn from_value(value: &Value, scope: &IsolateScope) -> Self {
        match marshal::marshal(value, scope) {
            Ok(copied) => Self::thrown(copied),
            Err(e) => Self::from(e),
        }
    }

    /// Error class
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The thrown guest value, for `ErrorKind::Thrown`
    pub fn thrown_value(&self) -> Option<&MarshalledValue> {
        self.thrown.as_ref()
    }

    /// Formatted stack text
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Replace the stack text with a captured call stack
    pub fn with_stack(mut self, stack: &CallStack) -> Self {
        self.stack = stack.to_string();
        self
    }

    /// Append the stack of the call site that scheduled the failed work
    pub fn chain_stack(mut self, stack: &CallStack) -> Self {
        if stack.is_empty() {
            return self;
        }
        if !self.stack.is_empty() {
            self.stack.push('\n');
        }
        self.stack.push_str("    at (<async>)\n");
        self.stack.push_str(&stack.to_string());
        self
    }

    /// Materialise this error inside `scope`'s isolate
    ///
    /// Thrown guest values are copied back as themselves; every other error
    /// becomes an error object. This never fails: a thrown value that cannot
    /// be copied in degrades to an error object with the same message.
    pub fn into_value(self, scope: &mut IsolateScope) -> Value {
        if let Some(MarshalledValue::Error { name, message, .. }) = &self.thrown {
            return scope.new_error(name, message, &self.stack);
        }
        if let Some(thrown) = self.thrown.clone() {
            if let Ok(value) = marshal::unmarshal(thrown, scope) {
                return value;
            }
        }
        scope.new_error(self.kind.name(), &self.message, &self.stack)
    }
}

impl From<IsolateError> for RuntimeError {
    fn from(err: IsolateError) -> Self {
        match err {
            IsolateError::Disposed(_) => RuntimeError::isolate_disposed(),
            IsolateError::UnexpectedObject { .. } | IsolateError::WrongIsolate { .. } => {
                RuntimeError::type_error(err.to_string())
            }
            other => RuntimeError::error(other.to_string()),
        }
    }
}

impl From<MarshalError> for RuntimeError {
    fn from(err: MarshalError) -> Self {
        match err {
            MarshalError::MaxDepthExceeded => RuntimeError::range_error(err.to_string()),
            other => RuntimeError::type_error(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackFrame;

    #[test]
    fn test_runtime_error_display() {
        let err = RuntimeError::type_error("bad argument");
        assert_eq!(err.to_string(), "TypeError: bad argument");
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }

    #[test]
    fn test_isolate_disposed_message() {
        let err = RuntimeError::from(IsolateError::Disposed(IsolateId::new()));
        assert_eq!(err.message(), ISOLATE_DISPOSED);
    }

    #[test]
    fn test_thrown_string() {
        let err = RuntimeError::thrown(MarshalledValue::String("boom".to_string()));
        assert_eq!(err.kind(), ErrorKind::Thrown);
        assert_eq!(err.message(), "\"boom\"");
        assert!(err.thrown_value().is_some());
    }

    #[test]
    fn test_chain_stack() {
        let stack = CallStack::from_frames(vec![StackFrame::new("caller", Some("main.ry:3"))]);
        let err = RuntimeError::error("failed").chain_stack(&stack);

        assert!(err.stack().contains("(<async>)"));
        assert!(err.stack().contains("at caller (main.ry:3)"));

        let untouched = RuntimeError::error("failed").chain_stack(&CallStack::default());
        assert!(untouched.stack().is_empty());
    }

    #[test]
    fn test_marshal_error_conversion() {
        let err = RuntimeError::from(MarshalError::MaxDepthExceeded);
        assert_eq!(err.kind(), ErrorKind::RangeError);
    }
}
