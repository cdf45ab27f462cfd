//! Data marshalling for cross-isolate value passing
//!
//! Marshalling provides safe, controlled data transfer between isolates.
//! Values are deep-copied across isolate boundaries to maintain heap isolation.

use crate::error::IsolateError;
use crate::heap::HeapObject;
use crate::isolate::IsolateScope;
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Maximum nesting depth for marshalling (also catches cyclic graphs)
pub const MAX_DEPTH: usize = 64;

/// Errors that can occur during marshalling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarshalError {
    /// Value cannot be marshalled (e.g., a promise)
    #[error("Value cannot be marshalled: {0}")]
    Unmarshallable(String),

    /// Maximum marshalling depth exceeded (prevents infinite recursion)
    #[error("Maximum marshalling depth exceeded")]
    MaxDepthExceeded,

    /// A handle could not be read in the source isolate
    #[error(transparent)]
    Isolate(#[from] IsolateError),
}

/// Marshalled value that can be safely transferred between isolates
///
/// MarshalledValue represents a value that has been copied in a way that
/// preserves its semantic meaning while being independent of any specific
/// isolate's heap.
#[derive(Debug, Clone, PartialEq)]
pub enum MarshalledValue {
    /// Undefined value
    Undefined,

    /// Null value
    Null,

    /// Boolean value
    Bool(bool),

    /// 32-bit signed integer
    I32(i32),

    /// 64-bit floating point number
    F64(f64),

    /// String value (deep copy)
    String(String),

    /// Array of marshalled values (deep copy, recursive)
    Array(Vec<MarshalledValue>),

    /// Object/record with key-value pairs (deep copy, recursive)
    Object(BTreeMap<String, MarshalledValue>),

    /// Error object
    Error {
        /// Error class name
        name: String,
        /// Error message
        message: String,
        /// Stack text
        stack: String,
    },
}

impl MarshalledValue {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, MarshalledValue::Null)
    }

    /// Get the i32 payload
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            MarshalledValue::I32(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MarshalledValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            MarshalledValue::Undefined => "undefined",
            MarshalledValue::Null => "null",
            MarshalledValue::Bool(_) => "boolean",
            MarshalledValue::I32(_) => "i32",
            MarshalledValue::F64(_) => "f64",
            MarshalledValue::String(_) => "string",
            MarshalledValue::Array(_) => "array",
            MarshalledValue::Object(_) => "object",
            MarshalledValue::Error { .. } => "error",
        }
    }
}

impl fmt::Display for MarshalledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalledValue::Undefined => write!(f, "undefined"),
            MarshalledValue::Null => write!(f, "null"),
            MarshalledValue::Bool(b) => write!(f, "{}", b),
            MarshalledValue::I32(i) => write!(f, "{}", i),
            MarshalledValue::F64(fl) => write!(f, "{}", fl),
            MarshalledValue::String(s) => write!(f, "\"{}\"", s),
            MarshalledValue::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            MarshalledValue::Object(obj) => {
                write!(f, "{{")?;
                for (i, (k, v)) in obj.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            MarshalledValue::Error { name, message, .. } => write!(f, "{}: {}", name, message),
        }
    }
}

/// Marshal a value out of `scope`'s isolate
///
/// This performs a deep copy of the value, converting heap-allocated
/// objects into their marshalled representation.
pub fn marshal(value: &Value, scope: &IsolateScope) -> Result<MarshalledValue, MarshalError> {
    marshal_recursive(value, scope, 0)
}

fn marshal_recursive(
    value: &Value,
    scope: &IsolateScope,
    depth: usize,
) -> Result<MarshalledValue, MarshalError> {
    if depth >= MAX_DEPTH {
        return Err(MarshalError::MaxDepthExceeded);
    }

    let local = match value {
        Value::Undefined => return Ok(MarshalledValue::Undefined),
        Value::Null => return Ok(MarshalledValue::Null),
        Value::Bool(b) => return Ok(MarshalledValue::Bool(*b)),
        Value::I32(i) => return Ok(MarshalledValue::I32(*i)),
        Value::F64(f) => return Ok(MarshalledValue::F64(*f)),
        Value::String(s) => return Ok(MarshalledValue::String(s.clone())),
        Value::Object(local) => *local,
    };

    match scope.object(&local)? {
        HeapObject::Array(items) => items
            .iter()
            .map(|item| marshal_recursive(item, scope, depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(MarshalledValue::Array),
        HeapObject::Record(fields) => fields
            .iter()
            .map(|(k, v)| Ok((k.clone(), marshal_recursive(v, scope, depth + 1)?)))
            .collect::<Result<BTreeMap<_, _>, MarshalError>>()
            .map(MarshalledValue::Object),
        HeapObject::Error(error) => Ok(MarshalledValue::Error {
            name: error.name.clone(),
            message: error.message.clone(),
            stack: error.stack.clone(),
        }),
        HeapObject::Promise(_) => Err(MarshalError::Unmarshallable(
            "promises cannot be transferred between isolates".to_string(),
        )),
    }
}

/// Unmarshal a value into `scope`'s isolate
///
/// This allocates new objects in the target isolate's heap, performing a
/// deep copy of all data.
pub fn unmarshal(
    marshalled: MarshalledValue,
    scope: &mut IsolateScope,
) -> Result<Value, MarshalError> {
    unmarshal_recursive(marshalled, scope, 0)
}

fn unmarshal_recursive(
    marshalled: MarshalledValue,
    scope: &mut IsolateScope,
    depth: usize,
) -> Result<Value, MarshalError> {
    if depth >= MAX_DEPTH {
        return Err(MarshalError::MaxDepthExceeded);
    }

    match marshalled {
        MarshalledValue::Undefined => Ok(Value::Undefined),
        MarshalledValue::Null => Ok(Value::Null),
        MarshalledValue::Bool(b) => Ok(Value::Bool(b)),
        MarshalledValue::I32(i) => Ok(Value::I32(i)),
        MarshalledValue::F64(f) => Ok(Value::F64(f)),
        MarshalledValue::String(s) => Ok(Value::String(s)),
        MarshalledValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(unmarshal_recursive(item, scope, depth + 1)?);
            }
            Ok(scope.new_array(values))
        }
        MarshalledValue::Object(fields) => {
            let mut values = Vec::with_capacity(fields.len());
            for (key, item) in fields {
                values.push((key, unmarshal_recursive(item, scope, depth + 1)?));
            }
            Ok(scope.new_record(values))
        }
        MarshalledValue::Error {
            name,
            message,
            stack,
        } => Ok(scope.new_error(&name, &message, &stack)),
    }
}
