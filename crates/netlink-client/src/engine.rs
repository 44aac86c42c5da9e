//! The transport engine: outbound completion, raw send/receive, and the
//! dispatch loop that turns a byte stream into hook calls.

#![allow(unsafe_code)]

use std::{
    io, mem,
    sync::{Arc, Mutex},
};

use netlink_proto::{align, NlAddr, NlCreds, NlMessage, NlmFlags, NlmsgHeader, NlmsgType, ALIGN, AUTO_PORT, AUTO_SEQ};

use crate::{
    callback::{CallbackSet, Disposition, ErrorRecord, Event, HookArg, HookSelector},
    error::{NlError, Result},
    socket::Socket,
};

/// One raw read off the wire: bytes (possibly several concatenated
/// records), the sender, and any `SCM_CREDENTIALS` captured alongside it.
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// Raw bytes as returned by the kernel, trimmed to the bytes actually read.
    pub bytes: Vec<u8>,
    /// Address the datagram came from.
    pub from: NlAddr,
    /// Peer credentials, if `passcred` was enabled and the kernel supplied them.
    pub creds: Option<NlCreds>,
}

/// Outcome of handing a [`Disposition`] back from a hook to the dispatch
/// loop.
enum Flow {
    Proceed,
    SkipRecord,
    StopAll,
}

fn flow(disposition: Disposition) -> Result<Flow> {
    match disposition {
        Disposition::Proceed => Ok(Flow::Proceed),
        Disposition::Skip => {
            tracing::trace!("netlink: hook returned Skip");
            Ok(Flow::SkipRecord)
        },
        Disposition::Stop => {
            tracing::trace!("netlink: hook returned Stop");
            Ok(Flow::StopAll)
        },
        Disposition::Abort(err) => {
            tracing::warn!(error = %err, "netlink: hook aborted dispatch");
            Err(err)
        },
    }
}

/// Fill `AUTO_PORT`/`AUTO_SEQ` sentinels, default the destination to the
/// socket's peer, and stamp the bound protocol id.
fn complete_outbound(socket: &mut Socket, msg: &mut NlMessage) {
    let header = *msg.header();

    let port_id =
        if header.port_id() == AUTO_PORT { socket.local_addr().port_id } else { header.port_id() };
    let seq = if header.sequence() == AUTO_SEQ { socket.next_sequence() } else { header.sequence() };

    let mut flags = header.flags() | NlmFlags::REQUEST;
    if socket.auto_ack() {
        flags.insert(NlmFlags::ACK);
    }

    // INVARIANT: payload_room is 0, so `put` never calls `reserve` and the
    // only failure mode (`OutOfMemory` growing the buffer) cannot trigger.
    #[allow(clippy::expect_used)]
    msg.put(port_id, seq, header.msg_type(), 0, flags)
        .expect("header-only put with zero payload room cannot fail");

    if msg.dst().is_none() {
        msg.set_dst(socket.peer_addr());
    }
    msg.set_protocol(socket.protocol());
}

/// Complete and send one message, running it through the `MSG_OUT` hook
/// first.
///
/// # Errors
///
/// Any [`NlError`] from a `MSG_OUT` hook abort, or from the underlying send.
pub fn send(socket: &mut Socket, msg: &mut NlMessage) -> Result<usize> {
    tracing::debug!(msg_type = msg.header().msg_type(), "netlink: send");
    complete_outbound(socket, msg);

    let callbacks = socket.callbacks().retain();
    match flow(callbacks.invoke(Event::MsgOut, msg, Disposition::Proceed))? {
        Flow::Proceed | Flow::SkipRecord => {},
        Flow::StopAll => return Ok(0),
    }

    send_raw(socket, msg)
}

fn send_raw(socket: &mut Socket, msg: &NlMessage) -> Result<usize> {
    if let Some(over) = socket.callbacks().send_override() {
        return over(socket, msg);
    }
    raw_sendto(socket, msg)
}

fn raw_sendto(socket: &Socket, msg: &NlMessage) -> Result<usize> {
    let dst = msg.dst().unwrap_or_else(|| socket.peer_addr());

    // SAFETY: zero-initializing a plain-old-data struct is valid.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_pid = dst.port_id;
    addr.nl_groups = dst.groups;

    let bytes = msg.as_bytes();
    loop {
        // SAFETY: `bytes` is a valid slice of its stated length, `addr` is a
        // fully-initialized `sockaddr_nl` of the size passed below.
        let rc = unsafe {
            libc::sendto(
                socket.raw_fd(),
                bytes.as_ptr().cast::<libc::c_void>(),
                bytes.len(),
                0,
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(NlError::Sys(err));
        }
        return Ok(rc as usize);
    }
}

/// Build and send a one-off message with a type, header flags and raw
/// payload, the common case when no family-specific builder is in play.
///
/// # Errors
///
/// Propagates [`NlError`] from message construction or [`send`].
pub fn send_simple(socket: &mut Socket, nl_type: u16, flags: NlmFlags, payload: &[u8]) -> Result<usize> {
    let mut msg = NlMessage::simple(nl_type, flags);
    msg.append(payload, ALIGN)?;
    send(socket, &mut msg)
}

/// Send, then block for the matching acknowledgement if the message asked
/// for one (`ACK` flag) or the socket has `auto_ack` enabled.
///
/// # Errors
///
/// Propagates [`NlError`] from [`send`] or the ack wait.
pub fn send_synchronous(socket: &mut Socket, msg: &mut NlMessage) -> Result<()> {
    let wants_ack = msg.header().flags().contains(NlmFlags::ACK) || socket.auto_ack();
    send(socket, msg)?;
    if wants_ack {
        tracing::trace!(seq = msg.header().sequence(), "netlink: waiting for ack");
        wait_for_ack(socket, msg.header().sequence())?;
    }
    Ok(())
}

/// Outcome of a single raw `recvmsg(2)` call.
struct RecvOutcome {
    len: usize,
    from: NlAddr,
    creds: Option<NlCreds>,
    /// `MSG_TRUNC`: the payload was longer than the buffer we read into.
    truncated: bool,
    /// `MSG_CTRUNC`: the ancillary control buffer was too small.
    ctrunc: bool,
    /// Whether the returned source address is exactly `sockaddr_nl`-sized.
    namelen_ok: bool,
}

fn recvmsg_raw(
    fd: std::os::fd::RawFd,
    buf: &mut [u8],
    cmsg_buf: &mut [u8],
    passcred: bool,
    flags: libc::c_int,
) -> io::Result<RecvOutcome> {
    // SAFETY: zero-initializing plain-old-data structs is valid.
    let mut src: libc::sockaddr_nl = unsafe { mem::zeroed() };
    let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast::<libc::c_void>(), iov_len: buf.len() };

    // SAFETY: zero-initializing `msghdr` is valid; fields are set below.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_name = std::ptr::from_mut(&mut src).cast::<libc::c_void>();
    msg.msg_namelen = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
    msg.msg_iov = &raw mut iov;
    msg.msg_iovlen = 1;
    if passcred {
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = cmsg_buf.len();
    }

    // SAFETY: `msg` describes valid, correctly-sized buffers for the name,
    // iovec and (when `passcred`) control regions declared above.
    let rc = unsafe { libc::recvmsg(fd, &raw mut msg, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    let creds = if passcred { extract_creds(&msg) } else { None };
    let truncated = msg.msg_flags & libc::MSG_TRUNC != 0;
    let ctrunc = msg.msg_flags & libc::MSG_CTRUNC != 0;
    let namelen_ok = msg.msg_namelen as usize == mem::size_of::<libc::sockaddr_nl>();

    Ok(RecvOutcome { len: rc as usize, from: NlAddr::new(src.nl_pid, src.nl_groups), creds, truncated, ctrunc, namelen_ok })
}

fn extract_creds(msg: &libc::msghdr) -> Option<NlCreds> {
    // SAFETY: `msg` was just populated by a successful `recvmsg` call with a
    // correctly-sized control buffer; the cmsg macros only read within it.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(msg);
        while !cmsg.is_null() {
            let hdr = &*cmsg;
            if hdr.cmsg_level == libc::SOL_SOCKET && hdr.cmsg_type == libc::SCM_CREDENTIALS {
                let ucred = libc::CMSG_DATA(cmsg).cast::<libc::ucred>().read_unaligned();
                return Some(NlCreds { pid: ucred.pid, uid: ucred.uid, gid: ucred.gid });
            }
            cmsg = libc::CMSG_NXTHDR(std::ptr::from_ref(msg).cast_mut(), cmsg);
        }
    }
    None
}

const INITIAL_CMSG_LEN: usize = 128;

/// Read one datagram off the wire: peek its length first (if enabled),
/// allocate exactly that much, then do the real read with credentials if
/// requested. Retries transparently on `EINTR`, and grows and retries (per
/// the kernel's own truncation signals) instead of failing on the first
/// truncated attempt:
///
/// - if the ancillary control buffer was too small (`MSG_CTRUNC`), it is
///   doubled and the read retried;
/// - if the payload itself was truncated (`MSG_TRUNC`, or more bytes were
///   announced than the buffer held), the payload buffer is grown to the
///   kernel-announced size and the read retried with peek cleared.
///
/// Returns `Ok(None)` on `EWOULDBLOCK`/`EAGAIN` (a non-blocking socket with
/// nothing queued) rather than treating it as an error, per the same
/// "terminal conditions return 0" handling as end-of-stream.
///
/// # Errors
///
/// [`NlError::NoAddress`] if the kernel's returned source address isn't
/// exactly `sockaddr_nl`-sized; [`NlError::Sys`] for any other failing
/// syscall.
fn raw_recvfrom(socket: &Socket) -> Result<Option<RawDatagram>> {
    let passcred = socket.options().passcred_enabled();
    let mut peek = socket.peek();
    let mut payload_len = if peek { NlmsgHeader::SIZE } else { socket.options().buffer_size_bytes() };
    let mut cmsg_len = INITIAL_CMSG_LEN;

    loop {
        let read_len = if peek {
            let mut scratch = [0u8; 1];
            let mut cmsg_scratch = [0u8; INITIAL_CMSG_LEN];
            match recvmsg_raw(
                socket.raw_fd(),
                &mut scratch,
                &mut cmsg_scratch,
                false,
                libc::MSG_PEEK | libc::MSG_TRUNC,
            ) {
                Ok(outcome) => outcome.len.max(NlmsgHeader::SIZE),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(err) => return Err(NlError::Sys(err)),
            }
        } else {
            payload_len
        };

        let mut buf = vec![0u8; read_len];
        let mut cmsg_buf = vec![0u8; cmsg_len];
        match recvmsg_raw(socket.raw_fd(), &mut buf, &mut cmsg_buf, passcred, 0) {
            Ok(outcome) => {
                if outcome.ctrunc {
                    cmsg_len *= 2;
                    continue;
                }
                if outcome.truncated || outcome.len > buf.len() {
                    payload_len = outcome.len.max(read_len + 1);
                    peek = false;
                    continue;
                }
                if !outcome.namelen_ok {
                    return Err(NlError::NoAddress);
                }
                buf.truncate(outcome.len);
                return Ok(Some(RawDatagram { bytes: buf, from: outcome.from, creds: outcome.creds }));
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(err) => return Err(NlError::Sys(err)),
        }
    }
}

/// Read one datagram (via the `OverrideReceive` hook if installed, the raw
/// socket otherwise) and split it into its constituent records.
///
/// Returns `Ok(None)` when the receive primitive reports no data (terminal
/// condition, not an error): the dispatch loop's signal to stop cleanly.
fn next_datagram_records(socket: &mut Socket) -> Result<Option<Vec<NlMessage>>> {
    let datagram = if let Some(over) = socket.callbacks().recv_override() {
        over(socket)?
    } else {
        raw_recvfrom(socket)?
    };
    match datagram {
        Some(datagram) => Ok(Some(split_records(&datagram)?)),
        None => Ok(None),
    }
}

fn split_records(datagram: &RawDatagram) -> Result<Vec<NlMessage>> {
    let bytes = &datagram.bytes;
    let mut out = Vec::new();
    let mut offset = 0usize;

    while offset + NlmsgHeader::SIZE <= bytes.len() {
        let header = NlmsgHeader::from_bytes(&bytes[offset..])?;
        let declared = header.total_length() as usize;
        if declared < NlmsgHeader::SIZE || offset + declared > bytes.len() {
            return Err(NlError::MessageTruncated);
        }

        let mut msg = NlMessage::convert(&bytes[offset..])?;
        msg.set_src(datagram.from);
        if let Some(creds) = datagram.creds {
            msg.set_creds(creds);
        }
        out.push(msg);

        offset += align(declared);
    }

    Ok(out)
}

fn parse_error_record(msg: &NlMessage) -> Result<ErrorRecord> {
    let payload = msg.payload();
    if payload.len() < 4 + NlmsgHeader::SIZE {
        return Err(NlError::MessageTruncated);
    }
    // INVARIANT: the length check above guarantees at least 4 bytes.
    #[allow(clippy::expect_used)]
    let code = i32::from_ne_bytes(payload[0..4].try_into().expect("4-byte slice"));
    let original = *NlmsgHeader::from_bytes(&payload[4..])?;
    Ok(ErrorRecord { code, original })
}

/// Check (or defer to an overriding `SEQ_CHECK` hook) whether `msg`'s
/// sequence number matches what's expected.
///
/// With no `SEQ_CHECK` override installed, a mismatch is routed through the
/// `INVALID` hook (default: abort with [`NlError::SequenceMismatch`]) rather
/// than aborting directly, so a custom `INVALID` hook can tolerate it.
fn check_sequence(expected: Option<u32>, callbacks: &CallbackSet, msg: &NlMessage) -> Disposition {
    let actual = msg.header().sequence();
    let default = match expected {
        Some(expected) if expected != actual => callbacks.invoke(
            Event::Invalid,
            msg,
            Disposition::Abort(NlError::SequenceMismatch { expected, actual }),
        ),
        _ => Disposition::Proceed,
    };
    callbacks.invoke(Event::SeqCheck, msg, default)
}

/// Read and dispatch records until a hook says `Stop`, a `DONE` record ends
/// a multipart reply, or (when `expected_seq` is set) the matching
/// acknowledgement/error arrives. Returns the number of records dispatched
/// to an event hook.
///
/// Sequence validation runs whenever `expected_seq` is explicitly given, or
/// the socket has `auto_ack` enabled; either way the loop starts from a
/// snapshot of the socket's next-expected-receive counter (unless
/// `expected_seq` overrides it) and writes the advanced value back as each
/// control record (`DONE`/`ERROR`/`NOOP`/`OVERRUN`) is processed.
///
/// A `DUMP_INTR` record with no installed hook doesn't abort immediately: it
/// latches `interrupted` and lets the loop keep draining so the buffered
/// kernel stream ends up fully read before the error surfaces.
///
/// # Errors
///
/// Any [`NlError`] raised by a hook's [`Disposition::Abort`], a sequence
/// mismatch with no overriding hook, a malformed record, or a failing
/// syscall. [`NlError::DumpInterrupted`] once the loop has otherwise ended
/// normally, if an unhandled `DUMP_INTR` record was seen along the way.
fn dispatch_loop(socket: &mut Socket, expected_seq: Option<u32>) -> Result<i32> {
    tracing::trace!(?expected_seq, "netlink: dispatch loop entered");
    let mut processed = 0i32;
    let mut expected = expected_seq.unwrap_or_else(|| socket.next_expected_sequence());
    let checking_enabled = expected_seq.is_some() || socket.auto_ack();
    let mut multipart = false;
    let mut interrupted = false;

    'outer: loop {
        let records = match next_datagram_records(socket)? {
            Some(records) => records,
            None => break 'outer,
        };

        'records: for mut msg in records {
            msg.set_protocol(socket.protocol());
            let callbacks = socket.callbacks().retain();

            match flow(callbacks.invoke(Event::MsgIn, &msg, Disposition::Proceed))? {
                Flow::Proceed => {},
                Flow::SkipRecord => continue 'records,
                Flow::StopAll => break 'outer,
            }

            match flow(check_sequence(checking_enabled.then_some(expected), &callbacks, &msg))? {
                Flow::Proceed => {},
                Flow::SkipRecord => continue 'records,
                Flow::StopAll => break 'outer,
            }

            let header = *msg.header();

            if header.flags().contains(NlmFlags::MULTI) {
                multipart = true;
            }

            if header.flags().contains(NlmFlags::DUMP_INTR) {
                if callbacks.has(Event::DumpIntr) {
                    match flow(callbacks.invoke(Event::DumpIntr, &msg, Disposition::Proceed))? {
                        Flow::Proceed => {},
                        Flow::SkipRecord => continue 'records,
                        Flow::StopAll => break 'outer,
                    }
                } else {
                    tracing::trace!("netlink: dump interrupted, draining to DONE");
                    interrupted = true;
                }
            }

            processed += 1;

            let classify = header.classify();
            if matches!(
                classify,
                NlmsgType::Done | NlmsgType::Error | NlmsgType::Noop | NlmsgType::Overrun
            ) {
                expected = expected.wrapping_add(1);
                socket.set_next_expected_sequence(expected);
            }

            match classify {
                NlmsgType::Done => {
                    multipart = false;
                    let _ = flow(callbacks.invoke(Event::Finish, &msg, Disposition::Stop))?;
                    break 'outer;
                },
                NlmsgType::Overrun => {
                    let disposition =
                        callbacks.invoke(Event::Overrun, &msg, Disposition::Abort(NlError::MessageOverflow));
                    match flow(disposition)? {
                        Flow::StopAll => break 'outer,
                        Flow::Proceed | Flow::SkipRecord => continue 'records,
                    }
                },
                NlmsgType::Noop => {
                    match flow(callbacks.invoke(Event::Skipped, &msg, Disposition::Skip))? {
                        Flow::StopAll => break 'outer,
                        Flow::Proceed | Flow::SkipRecord => continue 'records,
                    }
                },
                NlmsgType::Error => {
                    let record = match parse_error_record(&msg) {
                        Ok(record) => record,
                        Err(_) => {
                            let disposition = callbacks.invoke(
                                Event::Invalid,
                                &msg,
                                Disposition::Abort(NlError::MessageTruncated),
                            );
                            match flow(disposition)? {
                                Flow::StopAll => break 'outer,
                                Flow::Proceed | Flow::SkipRecord => continue 'records,
                            }
                        },
                    };
                    if record.code == 0 {
                        match flow(callbacks.invoke(Event::Ack, &msg, Disposition::Stop))? {
                            Flow::StopAll => break 'outer,
                            Flow::Proceed | Flow::SkipRecord => {},
                        }
                    } else {
                        let peer = msg.src().unwrap_or_else(NlAddr::kernel);
                        // Netlink ERROR codes are `-errno`; translate the
                        // positive magnitude through the socket's pluggable
                        // mapping rather than hardcoding a single error kind.
                        let translated = (socket.errno_translator())(record.code.unsigned_abs() as i32);
                        let default = Disposition::Abort(translated);
                        match flow(callbacks.invoke_error(peer, &record, default))? {
                            Flow::StopAll => break 'outer,
                            Flow::Proceed | Flow::SkipRecord => {},
                        }
                    }
                    if expected_seq.is_some() {
                        break 'outer;
                    }
                },
                NlmsgType::Other(_) => {
                    match flow(callbacks.invoke(Event::Valid, &msg, Disposition::Proceed))? {
                        Flow::Proceed | Flow::SkipRecord => {},
                        Flow::StopAll => break 'outer,
                    }
                    if header.flags().contains(NlmFlags::ACK) {
                        match flow(callbacks.invoke(Event::SendAck, &msg, Disposition::Proceed))? {
                            Flow::StopAll => break 'outer,
                            Flow::Proceed | Flow::SkipRecord => {},
                        }
                    }
                    if expected_seq.is_some() && !header.flags().contains(NlmFlags::MULTI) {
                        break 'outer;
                    }
                },
            }
        }
    }

    tracing::trace!(processed, multipart, interrupted, "netlink: dispatch loop exited");
    if interrupted {
        return Err(NlError::DumpInterrupted);
    }
    Ok(processed)
}

/// Run the dispatch loop (via the `OverrideReceiveLoop` hook if installed,
/// the built-in loop otherwise) with no particular expected sequence.
///
/// # Errors
///
/// See [`dispatch_loop`].
pub fn receive_many(socket: &mut Socket) -> Result<i32> {
    tracing::debug!("netlink: receive_many");
    if let Some(over) = socket.callbacks().recv_loop_override() {
        let callbacks = socket.callbacks().retain();
        return over(socket, &callbacks);
    }
    dispatch_loop(socket, None)
}

fn ack_terminator(_msg: &NlMessage, _arg: &HookArg) -> Disposition {
    Disposition::Stop
}

/// Block until the acknowledgement or error for `seq` arrives.
///
/// Runs over a `duplicate`d callback set with `ACK` replaced by a
/// Stop-returning terminator, so a custom `ACK` hook installed on the
/// socket (e.g. one that logs and returns `Proceed`) can't keep this from
/// terminating on the matching acknowledgement. The duplicate is released
/// once the wait ends.
///
/// # Errors
///
/// The translated error if the peer returned a non-zero error code for
/// `seq`; any other [`NlError`] the dispatch loop would raise.
pub fn wait_for_ack(socket: &mut Socket, seq: u32) -> Result<()> {
    tracing::debug!(seq, "netlink: wait_for_ack");
    let callbacks = socket.callbacks().duplicate();
    callbacks.set(Event::Ack, HookSelector::Custom(ack_terminator), Arc::new(()));

    let previous = socket.callbacks().retain();
    socket.set_callbacks(callbacks);
    let result = dispatch_loop(socket, Some(seq));
    socket.set_callbacks(previous);
    result?;
    Ok(())
}

type PickupSlot = Arc<Mutex<Option<NlMessage>>>;

fn pickup_hook(msg: &NlMessage, arg: &HookArg) -> Disposition {
    if let Some(slot) = arg.downcast_ref::<PickupSlot>() {
        #[allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]
        let mut guard = slot.lock().expect("pickup slot mutex poisoned");
        *guard = Some(msg.clone());
    }
    Disposition::Stop
}

/// Run the dispatch loop over a `duplicate`d callback set with `VALID`
/// replaced by a hook that copies out the first family record it sees, then
/// return that record.
///
/// A single-object synchronous request layered over [`receive_many`]: the
/// duplicate leaves the socket's own callback set (and any other installed
/// hook) untouched, so this can be called in the middle of a larger dialog
/// without disturbing it.
///
/// # Errors
///
/// Any [`NlError`] the dispatch loop would raise; [`NlError::MessageTruncated`]
/// if the loop ended (e.g. on `FINISH` or a plain `Stop`) without a `VALID`
/// record ever reaching the hook.
pub fn pickup(socket: &mut Socket) -> Result<NlMessage> {
    tracing::debug!("netlink: pickup");
    let slot: PickupSlot = Arc::new(Mutex::new(None));
    let callbacks = socket.callbacks().duplicate();
    callbacks.set(Event::Valid, HookSelector::Custom(pickup_hook), Arc::clone(&slot) as HookArg);

    let previous = socket.callbacks().retain();
    socket.set_callbacks(callbacks);
    let result = dispatch_loop(socket, None);
    socket.set_callbacks(previous);
    result?;

    #[allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]
    let mut guard = slot.lock().expect("pickup slot mutex poisoned");
    guard.take().ok_or(NlError::MessageTruncated)
}

#[cfg(test)]
mod tests {
    use netlink_proto::NlmsgHeader;

    use super::*;
    use crate::socket::SocketOptions;

    #[test]
    fn split_records_handles_two_concatenated_messages() {
        let mut first = NlMessage::simple(10, NlmFlags::REQUEST);
        first.append(&[1, 2, 3], ALIGN).unwrap();
        let mut second = NlMessage::simple(11, NlmFlags::empty());
        second.append(&[4, 5], ALIGN).unwrap();

        let mut bytes = first.as_bytes().to_vec();
        bytes.extend_from_slice(second.as_bytes());

        let datagram = RawDatagram { bytes, from: NlAddr::kernel(), creds: None };
        let records = split_records(&datagram).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].header().msg_type(), 10);
        assert_eq!(records[1].header().msg_type(), 11);
    }

    #[test]
    fn split_records_rejects_declared_length_past_buffer() {
        let mut header = NlmsgHeader::simple(1, NlmFlags::empty());
        header.set_total_length(1000);
        let datagram = RawDatagram { bytes: header.to_bytes().to_vec(), from: NlAddr::kernel(), creds: None };

        assert!(matches!(split_records(&datagram), Err(NlError::MessageTruncated)));
    }

    #[test]
    fn parse_error_record_reads_code_and_original_header() {
        let mut msg = NlMessage::simple(2, NlmFlags::empty());
        let mut payload = (-5i32).to_ne_bytes().to_vec();
        payload.extend_from_slice(NlmsgHeader::simple(99, NlmFlags::REQUEST).to_bytes());
        msg.append(&payload, ALIGN).unwrap();

        let record = parse_error_record(&msg).unwrap();
        assert_eq!(record.code, -5);
        assert_eq!(record.original.msg_type(), 99);
    }

    fn test_socket(options: SocketOptions) -> Socket {
        Socket::connect(libc::NETLINK_GENERIC, options)
            .expect("opening an AF_NETLINK socket should not require elevated privileges")
    }

    #[test]
    fn complete_outbound_sets_request_and_ack_when_auto_ack_enabled() {
        let mut socket = test_socket(SocketOptions::new());
        let mut msg = NlMessage::simple(100, NlmFlags::empty());
        complete_outbound(&mut socket, &mut msg);
        assert!(msg.header().flags().contains(NlmFlags::REQUEST | NlmFlags::ACK));
    }

    #[test]
    fn complete_outbound_leaves_ack_unset_when_auto_ack_disabled() {
        let mut socket = test_socket(SocketOptions::new().auto_ack(false));
        let mut msg = NlMessage::simple(100, NlmFlags::empty());
        complete_outbound(&mut socket, &mut msg);
        assert!(msg.header().flags().contains(NlmFlags::REQUEST));
        assert!(!msg.header().flags().contains(NlmFlags::ACK));
    }
}
