use pnet::packet::{
    ip::IpNextHeaderProtocols,
    ipv4::{self, MutableIpv4Packet},
    udp::MutableUdpPacket,
};
use tracing::{debug, trace};

use nft_common::layout::{ETHERNET_LEN, L4_PAYLOAD_OFFSET, UDP_LEN};
use nft_wire::{
    splice,
    telemetry::{self, BlockMut, TelemetryHeader, BLOCK_LEN},
};

use crate::{ConfigError, Packet, PacketBatch, DEFAULT_MAX_PACKET_SIZE};

mod spec;
pub use spec::*;

#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    /// Offset at which the telemetry block is inserted.
    insert_offset: usize,
    /// Whether to fix up the IPv4 and UDP length fields after insertion.
    update_lengths: bool,
    /// Packets that would grow beyond this size are passed through untagged.
    max_packet_size: usize,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            insert_offset: L4_PAYLOAD_OFFSET,
            update_lengths: false,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl ClassifierOptions {
    /// Sets the offset at which the telemetry block is inserted. Defaults to right after the
    /// Ethernet, IPv4 and UDP headers.
    pub fn insert_offset(mut self, insert_offset: usize) -> Self {
        self.insert_offset = insert_offset;
        self
    }

    /// If set, the IPv4 total length and UDP length grow with the inserted block, the IPv4
    /// checksum is recomputed and the UDP checksum is cleared. Off by default, leaving the
    /// network headers to a protocol-aware stage.
    pub fn update_lengths(mut self, update_lengths: bool) -> Self {
        self.update_lengths = update_lengths;
        self
    }

    /// Sets the maximum size of a tagged packet.
    pub fn max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }
}

/// Inserts a telemetry block into packets of configured flows.
#[derive(Debug, Default)]
pub struct Classifier {
    options: ClassifierOptions,
    /// Flow specs in insertion order. The first match wins.
    specs: Vec<FlowSpec>,
}

impl Classifier {
    pub fn new(options: ClassifierOptions) -> Self {
        Self { options, specs: Vec::new() }
    }

    /// Appends flow specs. Either all of them are added or, if any is invalid, none.
    pub fn add_specs(
        &mut self,
        specs: impl IntoIterator<Item = FlowSpec>,
    ) -> Result<(), ConfigError> {
        let specs: Vec<_> = specs.into_iter().collect();
        for spec in &specs {
            spec.validate()?;
        }

        debug!(added = specs.len(), total = self.specs.len() + specs.len(), "added flow specs");
        self.specs.extend(specs);
        Ok(())
    }

    /// Parses and appends raw flow specs, all or nothing.
    pub fn add_spec_args(
        &mut self,
        args: impl IntoIterator<Item = FlowSpecArg>,
    ) -> Result<(), ConfigError> {
        let specs = args.into_iter().map(FlowSpec::try_from).collect::<Result<Vec<_>, _>>()?;
        self.add_specs(specs)
    }

    pub fn clear(&mut self) {
        debug!(len = self.specs.len(), "clearing flow specs");
        self.specs.clear();
    }

    #[inline]
    pub fn specs(&self) -> &[FlowSpec] {
        &self.specs
    }

    /// Tags every packet of the batch that belongs to a configured flow. Returns the number of
    /// tagged packets.
    pub fn process(&mut self, batch: &mut PacketBatch) -> usize {
        batch.iter_mut().map(|pkt| self.match_and_tag(pkt)).filter(|tagged| *tagged).count()
    }

    /// Inserts a telemetry block into `pkt` if it matches a flow spec. Packets that match
    /// nothing, or cannot be tagged, are left untouched. Returns whether the packet was tagged.
    pub fn match_and_tag(&mut self, pkt: &mut Packet) -> bool {
        let offset = self.options.insert_offset;
        if pkt.len() < offset {
            trace!(len = pkt.len(), offset, "packet shorter than insert offset");
            return false;
        }

        if telemetry::is_present(&pkt.data()[offset..]) {
            trace!(len = pkt.len(), "packet already carries telemetry");
            return false;
        }

        let Some(tuple) = FiveTuple::parse(pkt.data()) else {
            trace!(len = pkt.len(), "not an IPv4 packet");
            return false;
        };

        let Some(spec) = self.specs.iter_mut().find(|spec| spec.matches(&tuple)) else {
            return false;
        };

        if pkt.len() + BLOCK_LEN > self.options.max_packet_size {
            trace!(len = pkt.len(), max = self.options.max_packet_size, "no room for telemetry");
            return false;
        }

        let header = if spec.is_postcard() {
            TelemetryHeader::postcard()
        } else {
            match spec.next_metric() {
                Some(metric) => TelemetryHeader::request(metric),
                None => return false,
            }
        };

        if splice::insert_gap(pkt.data_mut(), offset, BLOCK_LEN).is_err() {
            return false;
        }

        if let Err(e) = BlockMut::init(&mut pkt.data_mut()[offset..], header) {
            debug!(?e, "failed to initialize telemetry block");
            return false;
        }

        trace!(
            src = %tuple.src,
            dst = %tuple.dst,
            metric = header.metric,
            postcard = header.postcard,
            "tagged packet"
        );

        if self.options.update_lengths {
            grow_lengths(pkt, offset);
        }

        true
    }
}

/// Accounts for a block inserted at `offset` in the IPv4 and UDP length fields.
fn grow_lengths(pkt: &mut Packet, offset: usize) {
    let Some(mut ip) = MutableIpv4Packet::new(&mut pkt.data_mut()[ETHERNET_LEN..]) else {
        return;
    };

    let ip_header_len = ip.get_header_length() as usize * 4;
    if offset < ETHERNET_LEN + ip_header_len {
        return;
    }

    ip.set_total_length(ip.get_total_length().saturating_add(BLOCK_LEN as u16));
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);

    let is_udp = ip.get_next_level_protocol() == IpNextHeaderProtocols::Udp;
    let l4 = ETHERNET_LEN + ip_header_len;
    if !is_udp || offset < l4 + UDP_LEN {
        return;
    }

    if let Some(mut udp) = MutableUdpPacket::new(&mut pkt.data_mut()[l4..]) {
        udp.set_length(udp.get_length().saturating_add(BLOCK_LEN as u16));
        udp.set_checksum(0);
    }
}
