use std::{fmt, net::Ipv4Addr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrefixError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("invalid prefix length: {0}")]
    Length(String),
}

/// An IPv4 network prefix such as `10.0.0.0/8`.
///
/// Host bits of the address are cleared on construction, so `10.1.2.3/8` and `10.0.0.0/8` are
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Prefix {
    addr: u32,
    mask: u32,
    len: u8,
}

impl Ipv4Prefix {
    /// Creates a new prefix. Lengths above 32 are clamped to 32.
    pub fn new(addr: Ipv4Addr, len: u8) -> Self {
        let len = len.min(32);
        let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
        Self { addr: u32::from(addr) & mask, mask, len }
    }

    /// The prefix matching every address.
    pub const fn any() -> Self {
        Self { addr: 0, mask: 0, len: 0 }
    }

    #[inline]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask == self.addr
    }

    #[inline]
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.addr)
    }

    #[inline]
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Returns `true` for the zero-length prefix, which matches everything.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for Ipv4Prefix {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for Ipv4Prefix {
    type Err = PrefixError;

    /// Parses `a.b.c.d/len`. A bare address is a host prefix (`/32`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => {
                let len = len
                    .parse::<u8>()
                    .ok()
                    .filter(|len| *len <= 32)
                    .ok_or_else(|| PrefixError::Length(len.to_string()))?;
                (addr, len)
            }
            None => (s, 32),
        };

        let addr = addr.parse::<Ipv4Addr>().map_err(|_| PrefixError::Address(addr.to_string()))?;
        Ok(Self::new(addr, len))
    }
}

impl fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network(), self.len)
    }
}
