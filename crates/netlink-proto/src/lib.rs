//! Wire format and message object for a netlink-style control protocol.
//!
//! This crate implements the bottom layer of the transport: a fixed 16-byte
//! record header, a 4-byte-aligned attribute TLV tree, and [`NlMessage`],
//! the owning container every other layer builds on. It has no socket, no
//! event loop, and no knowledge of any specific netlink family; those live
//! in `netlink-client` and its collaborators.

#![forbid(unsafe_code)]

pub mod addr;
pub mod attr;
pub mod error;
pub mod header;
pub mod message;

pub use addr::{NlAddr, NlCreds};
pub use attr::{Attr, AttrIter, NLA_F_NESTED, NLA_HDRLEN, NLA_TYPE_MASK};
pub use error::{ProtocolError, Result};
pub use header::{align, NlmFlags, NlmsgHeader, NlmsgType, ALIGN, AUTO_PORT, AUTO_SEQ};
pub use message::{NlMessage, ObjFlags, Protocol, PROTOCOL_UNBOUND};
