//! Errors produced while building or parsing netlink wire records.
//!
//! These are the "message object" layer errors: allocation failure and
//! structural truncation. Socket-level and dispatch-level errors live in
//! `netlink-client`, which wraps these via `#[from]`.

use thiserror::Error;

/// Errors from [`crate::NlMessage`] and attribute parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer growth failed (allocator returned an error or the requested
    /// size overflowed `usize`).
    #[error("out of memory: failed to grow message buffer by {requested} bytes")]
    OutOfMemory {
        /// Bytes that were being reserved when allocation failed.
        requested: usize,
    },

    /// Input shorter than the header it claims to carry.
    #[error("message truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum byte count the declared layout requires.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// An attribute's declared length runs past the end of its container.
    #[error("attribute out of bounds: declared length {declared} exceeds {available} remaining bytes")]
    AttrOutOfBounds {
        /// Length the attribute header declared.
        declared: usize,
        /// Bytes left in the enclosing payload/nest.
        available: usize,
    },

    /// An attribute declared a length shorter than its own header.
    #[error("attribute too short: length {len} is less than the {min} byte attribute header")]
    AttrTooShort {
        /// Declared attribute length.
        len: usize,
        /// Minimum valid attribute length (header size).
        min: usize,
    },
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
