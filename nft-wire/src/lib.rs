#![doc(issue_tracker_base_url = "https://github.com/nft-rs/nft/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Binary layouts for in-band telemetry.
//!
//! All multi-byte integers are big-endian. Sub-byte fields are packed with explicit shifts and
//! masks, the first listed field taking the most significant bits.

use thiserror::Error;

pub mod postcard;
pub mod splice;
pub mod telemetry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0:?}")]
    Io(#[from] std::io::Error),
    #[error("Buffer too short: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("Invalid preamble: {0:#010x}")]
    BadMagic(u32),
    #[error("Range out of bounds: {offset}+{len} exceeds {bound}")]
    OutOfBounds { offset: usize, len: usize, bound: usize },
}

/// The measurement a telemetry header requests from each hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetricType {
    Latency = 0,
    IngressPacketRate = 1,
    IngressByteRate = 2,
    EgressPacketRate = 3,
    EgressByteRate = 4,
}

impl MetricType {
    /// Returns `true` if the metric is satisfied by ingress-scoped counters.
    #[inline]
    pub const fn is_ingress_rate(self) -> bool {
        matches!(self, Self::IngressPacketRate | Self::IngressByteRate)
    }

    /// Returns `true` if the metric is satisfied by egress-scoped counters.
    #[inline]
    pub const fn is_egress_rate(self) -> bool {
        matches!(self, Self::EgressPacketRate | Self::EgressByteRate)
    }

    /// Returns `true` if the metric counts bytes rather than packets.
    #[inline]
    pub const fn is_byte_rate(self) -> bool {
        matches!(self, Self::IngressByteRate | Self::EgressByteRate)
    }
}

impl TryFrom<u8> for MetricType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Latency),
            1 => Ok(Self::IngressPacketRate),
            2 => Ok(Self::IngressByteRate),
            3 => Ok(Self::EgressPacketRate),
            4 => Ok(Self::EgressByteRate),
            _ => Err(value),
        }
    }
}

#[inline]
pub(crate) fn ensure_len(buf: &[u8], need: usize) -> Result<(), Error> {
    if buf.len() < need {
        return Err(Error::Truncated { need, have: buf.len() });
    }

    Ok(())
}
