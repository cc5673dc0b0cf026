//! # Error Types
//!
//! Two kinds of failure exist in seqnet:
//!
//! - **Precondition violations** (an empty stack, an input of the wrong length,
//!   a state handed to the wrong block) mean the computation graph itself is
//!   miswired. Those panic at the call site with a descriptive message.
//! - **Format errors** while loading persisted layers are ordinary data
//!   problems. Those surface as [`SerializeError`] values so a caller can retry,
//!   fall back, or report them.

use thiserror::Error;

/// Errors produced while encoding or decoding persisted layers and blocks.
#[derive(Debug, Error)]
pub enum SerializeError {
    /// An error annotated with the operation that was running.
    ///
    /// Displays as `"<context>: <inner error>"`, so nested loads read like
    /// `deserialize Stack: deserialize MaxPool: ...`.
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SerializeError>,
    },

    /// The byte record could not be decoded (truncated or corrupted).
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The record could not be encoded.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// A field record decoded, but with an unexpected number of fields.
    #[error("unexpected field count: expected {expected}, got {got}")]
    FieldCount { expected: &'static str, got: usize },

    /// A decoded field holds a value the layer cannot accept.
    #[error("invalid value {value} for field {field}")]
    InvalidField { field: &'static str, value: u64 },

    /// A composite was asked to persist a member that cannot be persisted.
    #[error("not a serializer: {kind}")]
    NotSerializer { kind: &'static str },
}

impl SerializeError {
    /// Wrap this error with the name of the operation that produced it.
    pub fn context(self, context: impl Into<String>) -> Self {
        SerializeError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip all context layers and return the innermost error.
    pub fn root(&self) -> &SerializeError {
        match self {
            SerializeError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<bincode::Error> for SerializeError {
    fn from(err: bincode::Error) -> Self {
        SerializeError::Malformed(err.to_string())
    }
}
