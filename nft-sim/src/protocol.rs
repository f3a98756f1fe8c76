use std::str::FromStr;

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid protocol: {0}")]
pub struct UnknownProtocol(String);

/// Transport protocols the frame builder can emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Protocol {
    #[default]
    UDP,
    TCP,
}

impl Protocol {
    /// Length of the transport header written by the frame builder.
    pub const fn header_len(self) -> usize {
        match self {
            Self::UDP => 8,
            Self::TCP => 20,
        }
    }

    pub const fn ip_protocol(self) -> IpNextHeaderProtocol {
        match self {
            Self::UDP => IpNextHeaderProtocols::Udp,
            Self::TCP => IpNextHeaderProtocols::Tcp,
        }
    }
}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Self::UDP),
            "tcp" => Ok(Self::TCP),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}
