use std::time::SystemTime;

mod prefix;
pub use prefix::{Ipv4Prefix, PrefixError};

/// Returns the current UNIX timestamp in microseconds. A clock set before the epoch reads as 0.
#[inline]
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u32 = 1024;
    pub const MiB: u32 = 1024 * KiB;
    pub const GiB: u32 = 1024 * MiB;
}

/// Well-known header lengths of the Ethernet/IPv4/UDP stack assumed by the pipeline.
pub mod layout {
    /// Ethernet II header without VLAN tags.
    pub const ETHERNET_LEN: usize = 14;
    /// IPv4 header without options.
    pub const IPV4_LEN: usize = 20;
    pub const UDP_LEN: usize = 8;
    /// Offset right after the Ethernet, IPv4 and UDP headers.
    pub const L4_PAYLOAD_OFFSET: usize = ETHERNET_LEN + IPV4_LEN + UDP_LEN;
}
