//! The socket endpoint: an open netlink file descriptor plus the
//! configuration applied to it.

#![allow(unsafe_code)]

use std::{io, mem, os::fd::RawFd};

use netlink_proto::{NlAddr, Protocol};

use crate::{
    callback::{CallbackSet, Personality},
    error::{default_errno_translator, ErrnoTranslator, NlError, Result},
};

/// Configuration applied when a socket is connected.
///
/// Consumed by [`Socket::connect`]; every setter returns `Self` so options
/// can be chained before the real `socket()`/`bind()` calls happen.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    buffer_size: usize,
    passcred: bool,
    peek: bool,
    auto_ack: bool,
    groups: u32,
    nonblocking: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            passcred: false,
            peek: true,
            auto_ack: true,
            groups: 0,
            nonblocking: false,
        }
    }
}

impl SocketOptions {
    /// Start from the default configuration (32 KiB buffers, peek-then-read
    /// on, auto-ack on, no multicast groups, no credential passing).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Socket send/receive buffer size in bytes (`SO_SNDBUF`/`SO_RCVBUF`).
    #[must_use]
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Whether to request `SCM_CREDENTIALS` ancillary data on receive.
    #[must_use]
    pub fn passcred(mut self, on: bool) -> Self {
        self.passcred = on;
        self
    }

    /// Whether the raw receive primitive peeks the record length before
    /// allocating the full-size buffer, instead of reading into a fixed
    /// scratch buffer and erroring on truncation.
    #[must_use]
    pub fn peek(mut self, on: bool) -> Self {
        self.peek = on;
        self
    }

    /// Whether `REQUEST` records without `ACK` set still get an automatic
    /// acknowledgement wait after send.
    #[must_use]
    pub fn auto_ack(mut self, on: bool) -> Self {
        self.auto_ack = on;
        self
    }

    /// Multicast groups to subscribe to at bind time.
    #[must_use]
    pub fn groups(mut self, groups: u32) -> Self {
        self.groups = groups;
        self
    }

    /// Whether the socket is set non-blocking (`O_NONBLOCK`) at connect
    /// time. A non-blocking socket with nothing queued has both the raw
    /// receive primitive and the dispatch loop return cleanly instead of
    /// blocking, rather than surfacing `EWOULDBLOCK` as an error.
    #[must_use]
    pub fn nonblocking(mut self, on: bool) -> Self {
        self.nonblocking = on;
        self
    }

    /// Configured receive/send buffer size.
    #[must_use]
    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size
    }

    /// Whether credential passing was requested.
    #[must_use]
    pub fn passcred_enabled(&self) -> bool {
        self.passcred
    }

    /// Whether the socket was requested non-blocking.
    #[must_use]
    pub fn nonblocking_enabled(&self) -> bool {
        self.nonblocking
    }
}

/// An open netlink socket endpoint: one file descriptor, its bound local
/// address, its default peer, and the bookkeeping the transport engine
/// needs (next sequence number, default callback set).
pub struct Socket {
    fd: RawFd,
    protocol: Protocol,
    local: NlAddr,
    peer: NlAddr,
    options: SocketOptions,
    next_seq: u32,
    next_expected_seq: u32,
    callbacks: CallbackSet,
    errno_translator: ErrnoTranslator,
}

impl Socket {
    /// Open, configure and bind a netlink socket for `protocol`
    /// (e.g. `NETLINK_ROUTE`), then default its peer to the kernel.
    ///
    /// # Errors
    ///
    /// [`NlError::Sys`] for any failing syscall; [`NlError::NoAddress`] or
    /// [`NlError::AfNotSupported`] if `bind`'s returned address doesn't look
    /// like a netlink address of the expected size/family.
    pub fn connect(protocol: impl Into<Protocol>, options: SocketOptions) -> Result<Self> {
        let protocol = protocol.into();

        // SAFETY: a plain `socket(2)` call, return value checked below.
        // `SOCK_CLOEXEC` sets close-on-exec atomically at creation, where the
        // platform supports combining it with the socket type.
        let fd = unsafe {
            libc::socket(libc::AF_NETLINK, libc::SOCK_RAW | libc::SOCK_CLOEXEC, protocol.raw())
        };
        if fd < 0 {
            return Err(NlError::Sys(io::Error::last_os_error()));
        }

        if let Err(err) = apply_options(fd, &options) {
            // SAFETY: fd was just opened above and nothing else holds it.
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }

        let local = match bind(fd, options.groups) {
            Ok(addr) => addr,
            Err(err) => {
                // SAFETY: fd was just opened above and nothing else holds it.
                unsafe {
                    libc::close(fd);
                }
                return Err(err);
            },
        };

        tracing::debug!(protocol = protocol.raw(), port_id = local.port_id, "netlink: socket connected");

        Ok(Self {
            fd,
            protocol,
            local,
            peer: NlAddr::kernel(),
            options,
            next_seq: 1,
            next_expected_seq: 1,
            callbacks: CallbackSet::allocate(Personality::Default),
            errno_translator: default_errno_translator,
        })
    }

    /// The underlying file descriptor, for use by the transport engine.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// The protocol id this socket was connected with.
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// This endpoint's own bound address.
    #[must_use]
    pub fn local_addr(&self) -> NlAddr {
        self.local
    }

    /// The address messages are sent to when none is set on the message
    /// itself.
    #[must_use]
    pub fn peer_addr(&self) -> NlAddr {
        self.peer
    }

    /// Change the default peer (e.g. to address a specific multicast group
    /// listener, or move off the kernel default).
    pub fn set_peer_addr(&mut self, peer: NlAddr) {
        self.peer = peer;
    }

    /// The options this socket was connected with.
    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.options
    }

    /// Whether automatic acknowledgement waiting is enabled.
    #[must_use]
    pub fn auto_ack(&self) -> bool {
        self.options.auto_ack
    }

    /// Enable or disable automatic acknowledgement waiting after send.
    pub fn set_auto_ack(&mut self, on: bool) {
        self.options.auto_ack = on;
    }

    /// Whether the raw receive path peeks the record length first.
    #[must_use]
    pub fn peek(&self) -> bool {
        self.options.peek
    }

    /// Toggle peek-then-read behavior on the raw receive path.
    pub fn set_peek(&mut self, on: bool) {
        self.options.peek = on;
    }

    /// Hand out the next sequence number and advance the counter.
    ///
    /// Wraps on overflow; a netlink dialog is never expected to live long
    /// enough for a `u32` sequence space to matter.
    pub fn next_sequence(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// The sequence number the dispatch loop currently expects on the next
    /// inbound control record (`DONE`/`ERROR`/`NOOP`/`OVERRUN`).
    ///
    /// Independent of [`Self::next_sequence`]'s next-to-send counter; it
    /// advances only as control records are processed, not as messages are
    /// sent.
    #[must_use]
    pub fn next_expected_sequence(&self) -> u32 {
        self.next_expected_seq
    }

    /// Overwrite the next-expected-receive sequence counter.
    pub fn set_next_expected_sequence(&mut self, seq: u32) {
        self.next_expected_seq = seq;
    }

    /// This socket's default callback set.
    #[must_use]
    pub fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    /// Replace this socket's default callback set (e.g. with a `retain`ed
    /// handle shared with another socket, or a fresh `duplicate`).
    pub fn set_callbacks(&mut self, callbacks: CallbackSet) {
        self.callbacks = callbacks;
    }

    /// The mapping currently used to translate a non-zero `ERROR` record's
    /// embedded code into an [`NlError`].
    #[must_use]
    pub fn errno_translator(&self) -> ErrnoTranslator {
        self.errno_translator
    }

    /// Install a different error-code translation mapping.
    pub fn set_errno_translator(&mut self, translator: ErrnoTranslator) {
        self.errno_translator = translator;
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        tracing::debug!(fd = self.fd, "netlink: socket closed");
        // SAFETY: `fd` is owned exclusively by this `Socket` and only ever
        // closed here or on a failed `connect`, never both.
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn apply_options(fd: RawFd, options: &SocketOptions) -> Result<()> {
    let size = i32::try_from(options.buffer_size).unwrap_or(i32::MAX);
    setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size)?;
    setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size)?;
    if options.passcred {
        setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_PASSCRED, 1)?;
    }
    if options.nonblocking {
        set_nonblocking(fd)?;
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is a valid, open descriptor for the duration of this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(NlError::Sys(io::Error::last_os_error()));
    }
    // SAFETY: same descriptor, setting a flag read back just above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(NlError::Sys(io::Error::last_os_error()));
    }
    Ok(())
}

fn setsockopt_i32(fd: RawFd, level: libc::c_int, name: libc::c_int, value: i32) -> Result<()> {
    // SAFETY: `value` is a plain `i32` whose address and size exactly match
    // what `setsockopt` is told to read.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            std::ptr::from_ref(&value).cast::<libc::c_void>(),
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(NlError::Sys(io::Error::last_os_error()));
    }
    Ok(())
}

fn bind(fd: RawFd, groups: u32) -> Result<NlAddr> {
    // SAFETY: `sockaddr_nl` is a plain-old-data struct; zeroing it is valid.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    addr.nl_pid = 0; // let the kernel assign a port id
    addr.nl_groups = groups;

    let addr_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
    // SAFETY: `addr` is a valid, fully-initialized `sockaddr_nl` of the size
    // passed in `addr_len`.
    let rc = unsafe {
        libc::bind(
            fd,
            std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
            addr_len,
        )
    };
    if rc < 0 {
        return Err(NlError::Sys(io::Error::last_os_error()));
    }

    read_local_addr(fd)
}

fn read_local_addr(fd: RawFd) -> Result<NlAddr> {
    // SAFETY: zero-initializing a plain-old-data struct is valid.
    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    let mut addr_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
    // SAFETY: `addr`/`addr_len` describe a valid, writable buffer of that size.
    let rc = unsafe {
        libc::getsockname(
            fd,
            std::ptr::from_mut(&mut addr).cast::<libc::sockaddr>(),
            &raw mut addr_len,
        )
    };
    if rc < 0 {
        return Err(NlError::Sys(io::Error::last_os_error()));
    }
    if addr_len as usize != mem::size_of::<libc::sockaddr_nl>() {
        return Err(NlError::NoAddress);
    }
    if addr.nl_family != libc::AF_NETLINK as libc::sa_family_t {
        return Err(NlError::AfNotSupported);
    }

    Ok(NlAddr::new(addr.nl_pid, addr.nl_groups))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_sane_values() {
        let options = SocketOptions::default();
        assert_eq!(options.buffer_size, 32 * 1024);
        assert!(options.peek);
        assert!(options.auto_ack);
        assert!(!options.passcred);
        assert_eq!(options.groups, 0);
        assert!(!options.nonblocking);
    }

    #[test]
    fn options_builder_chains() {
        let options = SocketOptions::new()
            .buffer_size(4096)
            .passcred(true)
            .peek(false)
            .groups(3)
            .nonblocking(true);
        assert_eq!(options.buffer_size, 4096);
        assert!(options.passcred);
        assert!(!options.peek);
        assert_eq!(options.groups, 3);
        assert!(options.nonblocking);
    }
}
