use std::net::Ipv4Addr;

use pnet::packet::{
    ethernet::{EtherTypes, EthernetPacket},
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    Packet as _,
};

use nft_common::Ipv4Prefix;
use nft_wire::MetricType;

use crate::ConfigError;

/// The fields of a packet a [`FlowSpec`] matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Zero if the transport protocol has no ports.
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: IpNextHeaderProtocol,
}

impl FiveTuple {
    /// Parses an Ethernet frame carrying IPv4. Returns `None` for anything else.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let eth = EthernetPacket::new(frame)?;
        if eth.get_ethertype() != EtherTypes::Ipv4 {
            return None;
        }

        let ip = Ipv4Packet::new(eth.payload())?;
        let protocol = ip.get_next_level_protocol();
        let l4 = eth.payload().get(ip.get_header_length() as usize * 4..).unwrap_or_default();

        let (src_port, dst_port) = match protocol {
            IpNextHeaderProtocols::Udp => {
                UdpPacket::new(l4).map(|udp| (udp.get_source(), udp.get_destination()))
            }
            IpNextHeaderProtocols::Tcp => {
                TcpPacket::new(l4).map(|tcp| (tcp.get_source(), tcp.get_destination()))
            }
            _ => None,
        }
        .unwrap_or_default();

        Some(Self { src: ip.get_source(), dst: ip.get_destination(), src_port, dst_port, protocol })
    }
}

/// Raw flow specification as received from the administrative surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSpecArg {
    /// Source prefix, e.g. `10.0.0.0/8`. Empty matches any address.
    pub src_ip: String,
    /// Destination prefix. Empty matches any address.
    pub dst_ip: String,
    /// Zero matches any port.
    pub src_port: u32,
    pub dst_port: u32,
    pub is_postcard: bool,
    /// Measurement-type codes requested in rotation.
    pub tele_types: Vec<u32>,
}

/// A flow to tag with telemetry, and the measurements to request from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSpec {
    src: Ipv4Prefix,
    dst: Ipv4Prefix,
    src_port: u16,
    dst_port: u16,
    postcard: bool,
    metrics: Vec<MetricType>,
    /// Index of the next metric to request.
    cursor: usize,
}

impl FlowSpec {
    /// A flow between the given prefixes, any ports, with no measurements yet.
    pub fn new(src: Ipv4Prefix, dst: Ipv4Prefix) -> Self {
        Self { src, dst, src_port: 0, dst_port: 0, postcard: false, metrics: Vec::new(), cursor: 0 }
    }

    /// Restricts the flow to the given ports. Zero is a wildcard.
    pub fn ports(mut self, src_port: u16, dst_port: u16) -> Self {
        self.src_port = src_port;
        self.dst_port = dst_port;
        self
    }

    /// Sets the measurements requested, in rotation, from matching packets.
    pub fn metrics(mut self, metrics: impl IntoIterator<Item = MetricType>) -> Self {
        self.metrics = metrics.into_iter().collect();
        self.cursor = 0;
        self
    }

    /// Flags matching packets for postcard export instead of in-band accumulation.
    pub fn postcard(mut self) -> Self {
        self.postcard = true;
        self
    }

    #[inline]
    pub fn is_postcard(&self) -> bool {
        self.postcard
    }

    #[inline]
    pub fn metric_list(&self) -> &[MetricType] {
        &self.metrics
    }

    #[inline]
    pub fn matches(&self, tuple: &FiveTuple) -> bool {
        self.src.contains(tuple.src) &&
            self.dst.contains(tuple.dst) &&
            (self.src_port == 0 || self.src_port == tuple.src_port) &&
            (self.dst_port == 0 || self.dst_port == tuple.dst_port)
    }

    /// Returns the metric to request next and advances the rotation.
    pub(crate) fn next_metric(&mut self) -> Option<MetricType> {
        let metric = *self.metrics.get(self.cursor)?;
        self.cursor = (self.cursor + 1) % self.metrics.len();
        Some(metric)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.postcard && self.metrics.is_empty() {
            return Err(ConfigError::invalid("flow spec requests no measurement"));
        }

        Ok(())
    }
}

fn parse_prefix(s: &str) -> Result<Ipv4Prefix, ConfigError> {
    if s.is_empty() {
        return Ok(Ipv4Prefix::any());
    }

    s.parse().map_err(|e| ConfigError::invalid(format!("{e}")))
}

fn parse_port(port: u32) -> Result<u16, ConfigError> {
    u16::try_from(port).map_err(|_| ConfigError::invalid(format!("invalid port: {port}")))
}

impl TryFrom<FlowSpecArg> for FlowSpec {
    type Error = ConfigError;

    fn try_from(arg: FlowSpecArg) -> Result<Self, Self::Error> {
        let metrics = arg
            .tele_types
            .iter()
            .map(|code| {
                u8::try_from(*code)
                    .ok()
                    .and_then(|code| MetricType::try_from(code).ok())
                    .ok_or_else(|| ConfigError::invalid(format!("invalid measurement type: {code}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut spec = Self::new(parse_prefix(&arg.src_ip)?, parse_prefix(&arg.dst_ip)?)
            .ports(parse_port(arg.src_port)?, parse_port(arg.dst_port)?)
            .metrics(metrics);
        spec.postcard = arg.is_postcard;

        spec.validate()?;
        Ok(spec)
    }
}
