//! Socket endpoint and dispatch engine for a netlink-style control protocol.
//!
//! Builds on `netlink-proto`'s wire format: [`socket::Socket`] owns the
//! file descriptor and its configuration, [`callback::CallbackSet`] is the
//! hook table user code installs to react to inbound records, and
//! [`engine`] ties the two together with outbound completion, raw
//! send/receive, and the record dispatch loop.

pub mod callback;
pub mod engine;
pub mod error;
pub mod socket;

pub use callback::{
    CallbackSet, Disposition, ErrorHook, ErrorRecord, Event, Hook, HookArg, HookSelector,
    Personality, RecvLoopOverride, RecvOverride, SendOverride, ALL_EVENTS,
};
pub use engine::{pickup, receive_many, send, send_simple, send_synchronous, wait_for_ack, RawDatagram};
pub use error::{default_errno_translator, ErrnoTranslator, NlError, Result};
pub use socket::{Socket, SocketOptions};

pub use netlink_proto::{
    align, Attr, AttrIter, NlAddr, NlCreds, NlMessage, NlmFlags, NlmsgHeader, NlmsgType, ObjFlags,
    Protocol, ProtocolError, ALIGN, AUTO_PORT, AUTO_SEQ, NLA_F_NESTED, NLA_HDRLEN, NLA_TYPE_MASK,
    PROTOCOL_UNBOUND,
};
