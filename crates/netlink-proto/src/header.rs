//! Fixed 16-byte netlink message header, host-native byte order.
//!
//! Unlike a network-byte-order wire protocol, netlink is a purely local
//! (kernel<->userspace) transport, so every multi-byte field is read and
//! written in the host's native endianness (see `netlink(7)`).

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{ProtocolError, Result};

bitflags::bitflags! {
    /// Header flags read/written by the transport engine.
    ///
    /// Bits outside this set are family-specific and pass through untouched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NlmFlags: u16 {
        /// Message is a request (set by outbound completion).
        const REQUEST   = 0x0001;
        /// Part of a multipart message sequence.
        const MULTI     = 0x0002;
        /// Sender requests an acknowledgement.
        const ACK       = 0x0004;
        /// Echo request back to sender.
        const ECHO      = 0x0008;
        /// Dump was inconsistent; results may be incomplete.
        const DUMP_INTR = 0x0010;
        /// Dump was filtered as requested.
        const DUMP_FILTERED = 0x0020;

        /// Specify tree root for dump requests.
        const ROOT   = 0x0100;
        /// Return all matching entries.
        const MATCH  = 0x0200;
        /// Atomic snapshot semantics.
        const ATOMIC = 0x0400;
        /// `ROOT | MATCH`: the conventional "give me everything" dump request.
        const DUMP = Self::ROOT.bits() | Self::MATCH.bits();
    }
}

/// Control record types recognised by the transport engine.
///
/// Any type not in this set is a family-specific "valid" record delivered to
/// user hooks. Numeric values match the real netlink wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NlmsgType {
    /// No-op record, always skipped.
    Noop,
    /// Carries an error code (zero == pure acknowledgement).
    Error,
    /// Terminates a multipart stream.
    Done,
    /// Kernel reports lost data.
    Overrun,
    /// Family-specific record, not a control type.
    Other(u16),
}

impl NlmsgType {
    const NOOP: u16 = 1;
    const ERROR: u16 = 2;
    const DONE: u16 = 3;
    const OVERRUN: u16 = 4;

    /// Classify a raw wire type value.
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            Self::NOOP => Self::Noop,
            Self::ERROR => Self::Error,
            Self::DONE => Self::Done,
            Self::OVERRUN => Self::Overrun,
            other => Self::Other(other),
        }
    }

    /// Raw wire value for this type.
    #[must_use]
    pub fn to_raw(self) -> u16 {
        match self {
            Self::Noop => Self::NOOP,
            Self::Error => Self::ERROR,
            Self::Done => Self::DONE,
            Self::Overrun => Self::OVERRUN,
            Self::Other(raw) => raw,
        }
    }
}

/// Reserved port-id value: substitute the socket's bound port at completion.
pub const AUTO_PORT: u32 = 0;

/// Reserved sequence value: draw the socket's next sequence at completion.
pub const AUTO_SEQ: u32 = 0;

/// Alignment (in bytes) netlink records and attributes are padded to.
pub const ALIGN: usize = 4;

/// Round `len` up to the next multiple of `ALIGN`.
#[must_use]
pub const fn align(len: usize) -> usize {
    (len + (ALIGN - 1)) & !(ALIGN - 1)
}

/// Fixed 16-byte netlink message header.
///
/// Field layout (all native-endian `u32`/`u16`, stored here as byte arrays so
/// the struct can be safely cast from arbitrary wire bytes via `zerocopy`):
/// total length (4), type (2), flags (2), sequence (4), port-id (4).
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct NlmsgHeader {
    len: [u8; 4],
    nl_type: [u8; 2],
    flags: [u8; 2],
    seq: [u8; 4],
    pid: [u8; 4],
}

impl NlmsgHeader {
    /// Size of the serialized header (16 bytes).
    pub const SIZE: usize = 16;

    /// Build a zeroed header with the header's own length already stamped in.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            len: (Self::SIZE as u32).to_ne_bytes(),
            nl_type: 0u16.to_ne_bytes(),
            flags: 0u16.to_ne_bytes(),
            seq: 0u32.to_ne_bytes(),
            pid: 0u32.to_ne_bytes(),
        }
    }

    /// Build a header with type and flags set, length still just the header.
    #[must_use]
    pub fn simple(nl_type: u16, flags: NlmFlags) -> Self {
        let mut header = Self::empty();
        header.set_msg_type(nl_type);
        header.set_flags(flags);
        header
    }

    /// Parse a header from the front of `bytes` without copying.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if fewer than [`Self::SIZE`]
    /// bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _rest)| header)
            .map_err(|_| ProtocolError::Truncated { expected: Self::SIZE, actual: bytes.len() })
    }

    /// Serialize to an owned byte array.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Total record length, including this header (`16 + payload + pad`).
    #[must_use]
    pub fn total_length(&self) -> u32 {
        u32::from_ne_bytes(self.len)
    }

    /// Set the total record length field.
    pub fn set_total_length(&mut self, len: u32) {
        self.len = len.to_ne_bytes();
    }

    /// Raw record type.
    #[must_use]
    pub fn msg_type(&self) -> u16 {
        u16::from_ne_bytes(self.nl_type)
    }

    /// Classified record type.
    #[must_use]
    pub fn classify(&self) -> NlmsgType {
        NlmsgType::from_raw(self.msg_type())
    }

    /// Set the raw record type.
    pub fn set_msg_type(&mut self, nl_type: u16) {
        self.nl_type = nl_type.to_ne_bytes();
    }

    /// Header flags.
    #[must_use]
    pub fn flags(&self) -> NlmFlags {
        NlmFlags::from_bits_truncate(u16::from_ne_bytes(self.flags))
    }

    /// Overwrite the header flags.
    pub fn set_flags(&mut self, flags: NlmFlags) {
        self.flags = flags.bits().to_ne_bytes();
    }

    /// Sequence number.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        u32::from_ne_bytes(self.seq)
    }

    /// Set the sequence number.
    pub fn set_sequence(&mut self, seq: u32) {
        self.seq = seq.to_ne_bytes();
    }

    /// Port id.
    #[must_use]
    pub fn port_id(&self) -> u32 {
        u32::from_ne_bytes(self.pid)
    }

    /// Set the port id.
    pub fn set_port_id(&mut self, pid: u32) {
        self.pid = pid.to_ne_bytes();
    }
}

impl std::fmt::Debug for NlmsgHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlmsgHeader")
            .field("len", &self.total_length())
            .field("type", &self.classify())
            .field("flags", &self.flags())
            .field("seq", &self.sequence())
            .field("pid", &self.port_id())
            .finish()
    }
}

impl std::fmt::Display for NlmsgHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "type={:?} flags={:?} seq={} pid={} len={}",
            self.classify(),
            self.flags(),
            self.sequence(),
            self.port_id(),
            self.total_length(),
        )
    }
}

impl TryFrom<&[u8]> for NlmsgHeader {
    type Error = ProtocolError;

    /// Validate-then-cast from a raw byte slice, returning an owned copy.
    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes).map(|header| *header)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_size_is_sixteen() {
        assert_eq!(std::mem::size_of::<NlmsgHeader>(), NlmsgHeader::SIZE);
        assert_eq!(NlmsgHeader::SIZE, 16);
    }

    #[test]
    fn empty_header_len_is_header_size() {
        let header = NlmsgHeader::empty();
        assert_eq!(header.total_length(), 16);
    }

    #[test]
    fn simple_stamps_type_and_flags() {
        let header = NlmsgHeader::simple(3, NlmFlags::REQUEST | NlmFlags::ACK);
        assert_eq!(header.msg_type(), 3);
        assert_eq!(header.flags(), NlmFlags::REQUEST | NlmFlags::ACK);
        assert_eq!(header.total_length(), 16);
    }

    #[test]
    fn reject_short_buffer() {
        let buf = [0u8; 10];
        assert_eq!(
            NlmsgHeader::from_bytes(&buf),
            Err(ProtocolError::Truncated { expected: 16, actual: 10 })
        );
    }

    #[test]
    fn try_from_slice_matches_from_bytes() {
        let header = NlmsgHeader::simple(3, NlmFlags::REQUEST);
        let bytes = header.to_bytes();
        let parsed = NlmsgHeader::try_from(bytes.as_slice()).expect("should parse");
        assert_eq!(parsed, header);
    }

    #[test]
    fn try_from_short_slice_is_truncated() {
        let buf = [0u8; 4];
        assert_eq!(
            NlmsgHeader::try_from(buf.as_slice()),
            Err(ProtocolError::Truncated { expected: 16, actual: 4 })
        );
    }

    #[test]
    fn display_summarizes_the_header() {
        let header = NlmsgHeader::simple(3, NlmFlags::REQUEST);
        let rendered = header.to_string();
        assert!(rendered.contains("type="));
        assert!(rendered.contains("seq=0"));
    }

    #[test]
    fn control_types_classify() {
        assert_eq!(NlmsgType::from_raw(1), NlmsgType::Noop);
        assert_eq!(NlmsgType::from_raw(2), NlmsgType::Error);
        assert_eq!(NlmsgType::from_raw(3), NlmsgType::Done);
        assert_eq!(NlmsgType::from_raw(4), NlmsgType::Overrun);
        assert_eq!(NlmsgType::from_raw(100), NlmsgType::Other(100));
    }

    proptest! {
        #[test]
        fn round_trip(nl_type: u16, flags: u16, seq: u32, pid: u32, len: u32) {
            let mut header = NlmsgHeader::empty();
            header.set_msg_type(nl_type);
            header.set_flags(NlmFlags::from_bits_truncate(flags));
            header.set_sequence(seq);
            header.set_port_id(pid);
            header.set_total_length(len);

            let bytes = header.to_bytes();
            let parsed = NlmsgHeader::from_bytes(&bytes).expect("should parse");
            prop_assert_eq!(parsed.msg_type(), nl_type);
            prop_assert_eq!(parsed.sequence(), seq);
            prop_assert_eq!(parsed.port_id(), pid);
            prop_assert_eq!(parsed.total_length(), len);
        }

        #[test]
        fn align_rounds_up_to_four(n in 0usize..10_000) {
            let aligned = align(n);
            prop_assert!(aligned >= n);
            prop_assert_eq!(aligned % ALIGN, 0);
            prop_assert!(aligned - n < ALIGN);
        }
    }
}
