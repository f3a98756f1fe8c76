use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};
use pnet::{
    packet::{
        ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket},
        ip::IpNextHeaderProtocols,
        ipv4::{self, Ipv4Packet, MutableIpv4Packet},
        tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket},
        udp::{self, MutableUdpPacket, UdpPacket},
        Packet,
    },
    util::MacAddr,
};
use rand::Rng;

use crate::Protocol;

/// Length of an Ethernet II header.
pub const ETHERNET_LEN: usize = 14;
/// Length of an IPv4 header without options.
pub const IPV4_LEN: usize = 20;

/// Builds Ethernet/IPv4 frames carrying UDP or TCP, with valid checksums.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    protocol: Protocol,
    ttl: u8,
    payload: Bytes,
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self {
            src_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x01),
            dst_mac: MacAddr::new(0x02, 0, 0, 0, 0, 0x02),
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            src_port: 40_000,
            dst_port: 9_000,
            protocol: Protocol::UDP,
            ttl: 64,
            payload: Bytes::new(),
        }
    }
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, src: Ipv4Addr) -> Self {
        self.src = src;
        self
    }

    pub fn dst(mut self, dst: Ipv4Addr) -> Self {
        self.dst = dst;
        self
    }

    pub fn ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Sets a payload of `len` random bytes.
    pub fn random_payload<R: Rng>(mut self, rng: &mut R, len: usize) -> Self {
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);
        self.payload = payload.into();
        self
    }

    /// Length of all headers before the payload.
    pub fn headers_len(&self) -> usize {
        ETHERNET_LEN + IPV4_LEN + self.protocol.header_len()
    }

    /// Builds the frame.
    pub fn build(&self) -> BytesMut {
        let l4_len = self.protocol.header_len() + self.payload.len();
        let mut frame = BytesMut::zeroed(ETHERNET_LEN + IPV4_LEN + l4_len);

        // The buffer is sized for every header, so the constructors below cannot fail.
        if let Some(mut eth) = MutableEthernetPacket::new(&mut frame[..]) {
            eth.set_source(self.src_mac);
            eth.set_destination(self.dst_mac);
            eth.set_ethertype(EtherTypes::Ipv4);
        }

        if let Some(mut ip) = MutableIpv4Packet::new(&mut frame[ETHERNET_LEN..]) {
            ip.set_version(4);
            ip.set_header_length((IPV4_LEN / 4) as u8);
            ip.set_total_length((IPV4_LEN + l4_len) as u16);
            ip.set_ttl(self.ttl);
            ip.set_next_level_protocol(self.protocol.ip_protocol());
            ip.set_source(self.src);
            ip.set_destination(self.dst);
            let checksum = ipv4::checksum(&ip.to_immutable());
            ip.set_checksum(checksum);
        }

        let l4 = &mut frame[ETHERNET_LEN + IPV4_LEN..];
        l4[self.protocol.header_len()..].copy_from_slice(&self.payload);

        match self.protocol {
            Protocol::UDP => {
                if let Some(mut udp) = MutableUdpPacket::new(l4) {
                    udp.set_source(self.src_port);
                    udp.set_destination(self.dst_port);
                    udp.set_length(l4_len as u16);
                    let checksum = udp::ipv4_checksum(&udp.to_immutable(), &self.src, &self.dst);
                    udp.set_checksum(checksum);
                }
            }
            Protocol::TCP => {
                if let Some(mut tcp) = MutableTcpPacket::new(l4) {
                    tcp.set_source(self.src_port);
                    tcp.set_destination(self.dst_port);
                    tcp.set_sequence(1);
                    tcp.set_data_offset(5);
                    tcp.set_flags(TcpFlags::ACK);
                    tcp.set_window(u16::MAX);
                    let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &self.src, &self.dst);
                    tcp.set_checksum(checksum);
                }
            }
        }

        frame
    }
}

/// The addressing of a parsed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
    /// Offset of the transport payload.
    pub payload_offset: usize,
}

/// Parses an Ethernet/IPv4 frame carrying UDP or TCP.
pub fn parse(frame: &[u8]) -> Option<FrameInfo> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }

    let ip = Ipv4Packet::new(eth.payload())?;
    let l4 = ETHERNET_LEN + ip.get_header_length() as usize * 4;
    let segment = frame.get(l4..)?;

    let (protocol, src_port, dst_port, header_len) = match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(segment)?;
            (Protocol::UDP, udp.get_source(), udp.get_destination(), Protocol::UDP.header_len())
        }
        IpNextHeaderProtocols::Tcp => {
            let tcp = TcpPacket::new(segment)?;
            let header_len = tcp.get_data_offset() as usize * 4;
            (Protocol::TCP, tcp.get_source(), tcp.get_destination(), header_len)
        }
        _ => return None,
    };

    Some(FrameInfo {
        src: ip.get_source(),
        dst: ip.get_destination(),
        src_port,
        dst_port,
        protocol,
        payload_offset: l4 + header_len,
    })
}

/// Returns a random address inside `network/len`.
pub fn random_addr<R: Rng>(rng: &mut R, network: Ipv4Addr, len: u8) -> Ipv4Addr {
    let host_bits = 32 - u32::from(len.min(32));
    let mask = if host_bits == 32 { u32::MAX } else { (1u32 << host_bits) - 1 };
    Ipv4Addr::from((u32::from(network) & !mask) | (rng.gen::<u32>() & mask))
}
