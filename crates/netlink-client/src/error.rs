//! Errors surfaced at the socket/engine boundary.

use netlink_proto::ProtocolError;
use thiserror::Error;

/// Errors from the socket endpoint and transport engine.
#[derive(Debug, Error)]
pub enum NlError {
    /// Wire parsing/building failure from the message object layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// `connect` called on a socket that is already open.
    #[error("socket already connected")]
    BadSocket,

    /// The kernel returned an address of unexpected size or family on bind.
    #[error("unexpected address returned by bind")]
    NoAddress,

    /// The bound socket came back with the wrong address family.
    #[error("address family not supported")]
    AfNotSupported,

    /// A received record's sequence number did not match what was expected.
    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch {
        /// Sequence the engine expected.
        expected: u32,
        /// Sequence the record actually carried.
        actual: u32,
    },

    /// A message's declared length exceeds its backing buffer.
    #[error("message truncated")]
    MessageTruncated,

    /// The kernel reported lost data (`NLMSG_OVERRUN`).
    #[error("message overflow: kernel reported lost data")]
    MessageOverflow,

    /// A dump was interrupted and no `DUMP_INTR` hook was installed to
    /// handle it; the stream was drained through `DONE` before reporting.
    #[error("dump interrupted, data may be inconsistent")]
    DumpInterrupted,

    /// A hook explicitly aborted the current operation with this code.
    #[error("aborted by hook with code {0}")]
    Aborted(i32),

    /// A syscall failed, or an `ERROR` record's embedded code was translated
    /// to a platform error via the socket's [`ErrnoTranslator`].
    #[error("netlink error: {0}")]
    Sys(#[from] std::io::Error),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, NlError>;

/// Pluggable mapping from a platform errno (positive, per `errno(3)`
/// convention) to an [`NlError`]. Kept as a plain function pointer rather
/// than a trait object, in keeping with the rest of this crate's closed,
/// finite hook surfaces.
pub type ErrnoTranslator = fn(i32) -> NlError;

/// Default errno translator: wraps the errno in a [`std::io::Error`].
#[must_use]
pub fn default_errno_translator(errno: i32) -> NlError {
    NlError::Sys(std::io::Error::from_raw_os_error(errno))
}
