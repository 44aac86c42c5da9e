//! The message object: an owning container for one wire-format record.
//!
//! Holds a growable buffer whose first 16 bytes are the header, plus side
//! metadata not carried on the wire (bound protocol id, addresses,
//! credentials).

use std::io::{self, Write};

use crate::{
    addr::{NlAddr, NlCreds},
    attr::AttrIter,
    error::{ProtocolError, Result},
    header::{align, NlmFlags, NlmsgHeader, NlmsgType, ALIGN},
};

bitflags::bitflags! {
    /// Creation-time bookkeeping flags on the message object itself, distinct
    /// from [`NlmFlags`], which lives in the wire header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjFlags: u32 {
        /// This message was produced by a peek probe, not a full read.
        const PEEKED = 0x0001;
        /// Credentials are attached (kept in sync with `creds.is_some()`).
        const CRED_PRESENT = 0x0002;
    }
}

/// A netlink protocol id (e.g. `NETLINK_ROUTE`, `NETLINK_GENERIC`).
///
/// A thin newtype over the raw `i32` the kernel expects, so a bound protocol
/// can't be confused with an unrelated integer (a sequence number, a port
/// id) at a call site or in a struct field. Accepts a bare `i32` via `From`
/// so callers can keep passing `libc`'s raw protocol constants directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Protocol(i32);

impl Protocol {
    /// Not yet bound to a socket.
    pub const UNBOUND: Self = Self(-1);

    /// The raw protocol id as the kernel expects it.
    #[must_use]
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl From<i32> for Protocol {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

impl From<Protocol> for i32 {
    fn from(protocol: Protocol) -> Self {
        protocol.0
    }
}

/// Sentinel protocol id meaning "not yet bound to a socket".
pub const PROTOCOL_UNBOUND: Protocol = Protocol::UNBOUND;

/// An owned netlink message: header + payload + side metadata.
///
/// # Invariants
///
/// `buf.len()` always equals `header().total_length()` as a `usize`; any
/// reallocating mutation (`reserve`, `append`, `put`) invalidates pointers
/// previously returned by those same methods, which is why they return
/// fresh slices scoped to the call rather than indices or raw pointers.
#[derive(Debug, Clone)]
pub struct NlMessage {
    buf: Vec<u8>,
    protocol: Protocol,
    src: Option<NlAddr>,
    dst: Option<NlAddr>,
    creds: Option<NlCreds>,
    obj_flags: ObjFlags,
}

impl NlMessage {
    /// Allocate an empty message: just the zeroed, aligned header.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            buf: NlmsgHeader::empty().to_bytes().to_vec(),
            protocol: PROTOCOL_UNBOUND,
            src: None,
            dst: None,
            creds: None,
            obj_flags: ObjFlags::empty(),
        }
    }

    /// Allocate a message with type and flags stamped into the header.
    #[must_use]
    pub fn simple(nl_type: u16, flags: NlmFlags) -> Self {
        Self {
            buf: NlmsgHeader::simple(nl_type, flags).to_bytes().to_vec(),
            ..Self::empty()
        }
    }

    /// Copy type, flags, sequence and port-id from `template`; payload empty.
    #[must_use]
    pub fn inherit(template: &NlmsgHeader) -> Self {
        let mut header = NlmsgHeader::empty();
        header.set_msg_type(template.msg_type());
        header.set_flags(template.flags());
        header.set_sequence(template.sequence());
        header.set_port_id(template.port_id());
        Self { buf: header.to_bytes().to_vec(), ..Self::empty() }
    }

    /// Copy an existing on-wire record into a fresh owned buffer.
    ///
    /// The record's length is taken from its own header field, not from
    /// `raw.len()`: trailing bytes in `raw` beyond that length are ignored
    /// (they belong to the next record in a concatenated receive buffer).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] if `raw` is shorter than the header, or
    /// shorter than the length the header declares.
    pub fn convert(raw: &[u8]) -> Result<Self> {
        let header = NlmsgHeader::from_bytes(raw)?;
        let declared = header.total_length() as usize;
        if raw.len() < declared {
            return Err(ProtocolError::Truncated { expected: declared, actual: raw.len() });
        }
        Ok(Self { buf: raw[..declared].to_vec(), ..Self::empty() })
    }

    /// Borrow the header (first [`NlmsgHeader::SIZE`] bytes).
    #[must_use]
    pub fn header(&self) -> &NlmsgHeader {
        // INVARIANT: buf is only ever constructed with a full header already
        // written (empty/simple/inherit/convert), so this always parses.
        #[allow(clippy::expect_used)]
        NlmsgHeader::from_bytes(&self.buf).expect("invariant: buf always starts with a valid header")
    }

    /// Full on-wire buffer (header + payload + trailing pad).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Payload region (everything after the header).
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[NlmsgHeader::SIZE..]
    }

    /// Bound protocol id, or [`PROTOCOL_UNBOUND`] if not yet bound.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Bind this message to a protocol id.
    pub fn set_protocol(&mut self, protocol: impl Into<Protocol>) {
        self.protocol = protocol.into();
    }

    /// Source address metadata (where this record came from, if known).
    #[must_use]
    pub fn src(&self) -> Option<NlAddr> {
        self.src
    }

    /// Set the source address metadata.
    pub fn set_src(&mut self, src: NlAddr) {
        self.src = Some(src);
    }

    /// Destination address override (if unset, the socket's peer is used).
    #[must_use]
    pub fn dst(&self) -> Option<NlAddr> {
        self.dst
    }

    /// Set a per-message destination override.
    pub fn set_dst(&mut self, dst: NlAddr) {
        self.dst = Some(dst);
    }

    /// Attached peer credentials, if any were captured on receive.
    #[must_use]
    pub fn creds(&self) -> Option<NlCreds> {
        self.creds
    }

    /// Attach credentials, keeping the object flags in sync.
    pub fn set_creds(&mut self, creds: NlCreds) {
        self.creds = Some(creds);
        self.obj_flags.insert(ObjFlags::CRED_PRESENT);
    }

    /// Creation-time object flags (distinct from the wire header's flags).
    #[must_use]
    pub fn obj_flags(&self) -> ObjFlags {
        self.obj_flags
    }

    /// Grow the buffer by `len` bytes rounded up to `pad` (0 disables
    /// rounding), zero the padding bytes, and advance the header's declared
    /// length by the rounded total.
    ///
    /// Returns the newly reserved region. Any slice previously returned by
    /// `reserve`/`append`/`put` is invalidated the moment this is called
    /// again, since the backing `Vec` may reallocate.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::OutOfMemory`] if the new length would overflow
    /// `u32` (the header's length field) or `usize`.
    pub fn reserve(&mut self, len: usize, pad: usize) -> Result<&mut [u8]> {
        let tlen = if pad == 0 { len } else { align_to(len, pad) };

        let old_len = self.buf.len();
        let new_total =
            old_len.checked_add(tlen).ok_or(ProtocolError::OutOfMemory { requested: tlen })?;
        let new_header_len = u32::try_from(new_total)
            .map_err(|_| ProtocolError::OutOfMemory { requested: tlen })?;

        self.buf.resize(new_total, 0);
        self.header_mut_raw().set_total_length(new_header_len);

        Ok(&mut self.buf[old_len..new_total])
    }

    /// `reserve` followed by a copy of `data` into the new region.
    ///
    /// # Errors
    ///
    /// Propagates [`ProtocolError::OutOfMemory`] from [`Self::reserve`].
    pub fn append(&mut self, data: &[u8], pad: usize) -> Result<()> {
        let region = self.reserve(data.len(), pad)?;
        region[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Overwrite header fields and, if `payload_room > 0`, additionally
    /// reserve that much aligned payload.
    ///
    /// # Errors
    ///
    /// Propagates [`ProtocolError::OutOfMemory`] from [`Self::reserve`].
    pub fn put(
        &mut self,
        port_id: u32,
        seq: u32,
        nl_type: u16,
        payload_room: usize,
        flags: NlmFlags,
    ) -> Result<Option<&mut [u8]>> {
        {
            let header = self.header_mut_raw();
            header.set_port_id(port_id);
            header.set_sequence(seq);
            header.set_msg_type(nl_type);
            header.set_flags(flags);
        }

        if payload_room == 0 {
            return Ok(None);
        }

        self.reserve(payload_room, ALIGN).map(Some)
    }

    /// Attributes in the payload, starting after `family_header_size` bytes
    /// of opaque family-specific sub-header.
    ///
    /// `family_header_size` is the size reported by the cache-ops lookup
    /// hook for this message's `(protocol, type)`; pass `0` if
    /// the record has no family header.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] if the payload is shorter than
    /// `family_header_size`.
    pub fn attrs(&self, family_header_size: usize) -> Result<AttrIter<'_>> {
        let payload = self.payload();
        let offset = align(family_header_size);
        if payload.len() < offset {
            return Err(ProtocolError::Truncated { expected: offset, actual: payload.len() });
        }
        Ok(AttrIter::new(&payload[offset..]))
    }

    /// Write a human-readable transcript: header fields, payload hex+ASCII,
    /// and (for ERROR records) the embedded original header. Attribute trees
    /// are walked recursively with one extra indent level per nesting level;
    /// bytes not consumed by any attribute are labelled `LEFTOVER`.
    ///
    /// # Errors
    ///
    /// Any `io::Error` from writing to `sink`.
    pub fn dump(&self, sink: &mut impl Write, family_header_size: usize) -> io::Result<()> {
        let header = self.header();
        writeln!(
            sink,
            "nlmsg: len={} type={:?} flags={:?} seq={} pid={}",
            header.total_length(),
            header.classify(),
            header.flags(),
            header.sequence(),
            header.port_id()
        )?;

        if header.classify() == NlmsgType::Error {
            let payload = self.payload();
            if payload.len() >= 4 + NlmsgHeader::SIZE {
                // INVARIANT: the length check above guarantees at least 4 bytes.
                #[allow(clippy::expect_used)]
                let code = i32::from_ne_bytes(payload[0..4].try_into().expect("4 bytes"));
                writeln!(sink, "    error_code={code}")?;
                if let Ok(orig) = NlmsgHeader::from_bytes(&payload[4..]) {
                    writeln!(sink, "    original_header: {orig:?}")?;
                }
            }
        }

        dump_hex(sink, self.payload(), 1)?;

        match self.attrs(family_header_size) {
            Ok(iter) => dump_attrs(sink, iter, 1)?,
            Err(err) => writeln!(sink, "    <attribute parse error: {err}>")?,
        }

        Ok(())
    }

    fn header_mut_raw(&mut self) -> HeaderMut<'_> {
        HeaderMut { bytes: &mut self.buf[..NlmsgHeader::SIZE] }
    }
}

/// Thin wrapper giving field-level mutation of the header bytes embedded at
/// the front of `NlMessage::buf`, without an unsafe reinterpret cast.
struct HeaderMut<'a> {
    bytes: &'a mut [u8],
}

impl HeaderMut<'_> {
    fn set_total_length(&mut self, len: u32) {
        self.bytes[0..4].copy_from_slice(&len.to_ne_bytes());
    }

    fn set_msg_type(&mut self, nl_type: u16) {
        self.bytes[4..6].copy_from_slice(&nl_type.to_ne_bytes());
    }

    fn set_flags(&mut self, flags: NlmFlags) {
        self.bytes[6..8].copy_from_slice(&flags.bits().to_ne_bytes());
    }

    fn set_sequence(&mut self, seq: u32) {
        self.bytes[8..12].copy_from_slice(&seq.to_ne_bytes());
    }

    fn set_port_id(&mut self, pid: u32) {
        self.bytes[12..16].copy_from_slice(&pid.to_ne_bytes());
    }
}

fn align_to(len: usize, pad: usize) -> usize {
    (len + (pad - 1)) & !(pad - 1)
}

fn dump_hex(sink: &mut impl Write, data: &[u8], indent: usize) -> io::Result<()> {
    let prefix = "    ".repeat(indent);
    for chunk in data.chunks(16) {
        let hex: String = chunk.iter().map(|b| format!("{b:02x} ")).collect();
        let ascii: String =
            chunk.iter().map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' }).collect();
        writeln!(sink, "{prefix}{hex:<48}{ascii}")?;
    }
    Ok(())
}

fn dump_attrs(sink: &mut impl Write, mut iter: AttrIter<'_>, indent: usize) -> io::Result<()> {
    let prefix = "    ".repeat(indent);
    for item in iter.by_ref() {
        match item {
            Ok(attr) => {
                writeln!(
                    sink,
                    "{prefix}attr type={} nested={} len={}",
                    attr.kind(),
                    attr.is_nested(),
                    attr.payload().len()
                )?;
                if attr.is_nested() {
                    dump_attrs(sink, attr.nested(), indent + 1)?;
                } else {
                    dump_hex(sink, attr.payload(), indent + 1)?;
                }
            },
            Err(err) => {
                writeln!(sink, "{prefix}<attribute error: {err}>")?;
                break;
            },
        }
    }
    if !iter.leftover().is_empty() {
        writeln!(sink, "{prefix}LEFTOVER ({} bytes):", iter.leftover().len())?;
        dump_hex(sink, iter.leftover(), indent + 1)?;
    }
    Ok(())
}
