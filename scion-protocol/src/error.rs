//! Codec error taxonomy

use thiserror::Error;

/// Errors produced while encoding or decoding schema-driven values.
///
/// Every variant is scoped to the single value that triggered it; codec
/// failures never affect other in-flight calls or the process lifecycle.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload shape disagrees with the supplied descriptor.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// An object payload carried an attribute the descriptor does not declare.
    #[error("unknown attribute {name:?}")]
    UnknownAttribute { name: String },

    /// A required object attribute was absent.
    #[error("missing required attribute {name:?}")]
    MissingAttribute { name: String },

    /// The same key appeared more than once in an encoded map or object.
    #[error("duplicate key {name:?} in encoded payload")]
    DuplicateKey { name: String },

    /// A tuple payload did not match the descriptor's element count.
    #[error("tuple arity mismatch: descriptor has {expected} elements, value has {found}")]
    TupleArity { expected: usize, found: usize },

    /// The number has no representation in the text encoding (NaN, infinity).
    #[error("number {0} cannot be represented in the text encoding")]
    InvalidNumber(f64),

    /// The compact-binary payload could not be parsed at all.
    #[error("malformed msgpack payload: {0}")]
    MalformedMsgpack(String),

    /// The text-structured payload could not be parsed at all.
    #[error("malformed json payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A serialized type descriptor was not recognizable.
    #[error("invalid type descriptor: {0}")]
    InvalidDescriptor(String),
}

impl CodecError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
