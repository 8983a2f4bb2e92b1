//! Error types for replica core primitives.

use thiserror::Error;

/// Errors raised while decoding a run-length encoded bitfield stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The byte stream cannot be decoded into a bitfield.
    #[error("corrupt bitfield stream at byte {offset}: {reason}")]
    CorruptStream { offset: usize, reason: &'static str },

    /// The decoded bitfield would exceed the caller's size limit.
    #[error("decoded bitfield of {len} bytes exceeds limit of {limit} bytes")]
    TooLarge { len: u64, limit: u64 },
}

impl CodecError {
    pub(crate) fn corrupt(offset: usize, reason: &'static str) -> Self {
        CodecError::CorruptStream { offset, reason }
    }

    /// Whether this error describes a malformed stream (as opposed to an oversized one).
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CodecError::CorruptStream { .. })
    }
}

/// Errors raised by [`SparseBitfield`](crate::SparseBitfield) mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitfieldError {
    /// Bulk word insertion must start on a 32-bit word boundary.
    #[error("insert offset {start} is not a multiple of 32")]
    UnalignedInsert { start: u64 },

    /// The inserted words would run past the addressable bit space.
    #[error("insert of {words} words at bit {start} overflows the index space")]
    Overflow { start: u64, words: usize },
}
