//! Netlink socket addresses and ancillary credentials.
//!
//! Pure data types shared between the message object (which carries a
//! source/destination address and optional credentials as metadata) and
//! `netlink-client` (which binds, sends to, and receives these over a real
//! socket).

/// A netlink socket address: a port id plus a multicast group bitmask.
///
/// Mirrors `struct sockaddr_nl` minus the address-family field, which is
/// implicit once you're holding one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NlAddr {
    /// Port id (0 addresses the kernel).
    pub port_id: u32,
    /// Multicast group subscription bitmask.
    pub groups: u32,
}

impl NlAddr {
    /// Address of the kernel itself (port id 0, no groups).
    #[must_use]
    pub fn kernel() -> Self {
        Self { port_id: 0, groups: 0 }
    }

    /// Construct an address with an explicit port id and no group subscriptions.
    #[must_use]
    pub fn new(port_id: u32, groups: u32) -> Self {
        Self { port_id, groups }
    }
}

/// Peer credentials delivered via `SCM_CREDENTIALS` ancillary data.
///
/// Carried as a plain value behind `Option<NlCreds>` on the message object
/// rather than a nullable pointer: presence is the `Option` itself, with no
/// separate flag to keep in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NlCreds {
    /// Sender's process id.
    pub pid: i32,
    /// Sender's real user id.
    pub uid: u32,
    /// Sender's real group id.
    pub gid: u32,
}
