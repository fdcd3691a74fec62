//! Error types for the serialization layer.
//!
//! Any of these aborts the message being encoded or decoded. None of them
//! is fatal for the room that was handling the message.

/// Errors raised while resolving, encoding or decoding wire values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerdeError {
    /// No resolver is bound to the type and none can be derived.
    #[error("no resolver for type {0}")]
    UnsupportedType(&'static str),

    /// A collection or string is too long for the 16-bit length prefix.
    #[error("collection of {len} elements does not fit a 16-bit length")]
    EncodingOverflow { len: usize },

    /// The value (or the bytes) did not have the expected shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },

    /// A read would have gone past the end of the reader's window.
    #[error("unexpected end of stream: needed {needed} bytes, {remaining} left")]
    EndOfStream { needed: usize, remaining: usize },

    /// String bytes were not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// The envelope carries a type code missing from the code table.
    #[error("unknown type code {0}")]
    UnknownTypeCode(u16),

    /// Two payload types were given the same type code.
    #[error("type code {0} is already assigned")]
    DuplicateTypeCode(u16),
}

impl SerdeError {
    pub(crate) fn mismatch<T: ?Sized>(found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: found.into(),
        }
    }
}
