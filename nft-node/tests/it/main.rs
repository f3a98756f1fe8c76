use std::net::Ipv4Addr;

use bytes::BytesMut;
use nft_node::{Packet, PacketBatch};
use nft_sim::FrameBuilder;

mod node;
mod path;

/// A UDP frame from `src` to 192.168.0.1 with a 64-byte payload.
pub(crate) fn udp_from(src: Ipv4Addr) -> BytesMut {
    FrameBuilder::new().src(src).dst(Ipv4Addr::new(192, 168, 0, 1)).payload(vec![0x5a; 64]).build()
}

/// A batch of `n` copies of `frame`.
pub(crate) fn batch_of(frame: &[u8], n: usize) -> PacketBatch {
    (0..n).map(|_| Packet::from_slice(frame)).collect()
}
