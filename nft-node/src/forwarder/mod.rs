use bytes::BytesMut;
use tracing::{debug, trace};

use nft_common::constants::MiB;
use nft_wire::{
    postcard::{PostcardHeader, POSTCARD_HEADER_LEN, POSTCARD_VERSION},
    splice,
    telemetry::{self, BlockMut, HopRecord, BLOCK_LEN, MAX_RECORDS},
    MetricType,
};

use crate::{
    GateGroup, GateId, GateRegistry, Packet, PacketAllocator, PacketBatch, DEFAULT_MAX_PACKET_SIZE,
    MAX_BURST,
};

pub mod postcard;
pub use postcard::{Drain, Offer, PostcardRing};

#[derive(Debug, Clone)]
pub struct ForwarderOptions {
    /// Id stamped into every record and postcard this node writes.
    node_id: u8,
    /// Size of the postcard ring buffer in bytes.
    ring_capacity: usize,
    /// The maximum size of a postcard packet.
    max_packet_size: usize,
}

impl Default for ForwarderOptions {
    fn default() -> Self {
        Self { node_id: 0, ring_capacity: MiB as usize, max_packet_size: DEFAULT_MAX_PACKET_SIZE }
    }
}

impl ForwarderOptions {
    /// Sets the id of the node.
    pub fn node_id(mut self, node_id: u8) -> Self {
        self.node_id = node_id;
        self
    }

    /// Sets the capacity of the postcard ring buffer. The buffer is allocated once and never
    /// resized.
    pub fn ring_capacity(mut self, ring_capacity: usize) -> Self {
        self.ring_capacity = ring_capacity;
        self
    }

    /// Sets the maximum size of a postcard. Larger postcards are dropped.
    pub fn max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }
}

/// The result of processing one batch on a gate.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// The output gate, always the input gate.
    pub gate: GateId,
    /// Packets to emit on `gate`.
    pub batch: PacketBatch,
    /// Postcards queued in the ring buffer.
    pub postcards: usize,
    /// Older postcards evicted to make room.
    pub evicted: usize,
    /// Postcards that could not be queued.
    pub postcards_dropped: usize,
    /// Packets dropped because the gate is not registered.
    pub dropped: usize,
}

/// The result of a postcard drain run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskResult {
    /// Set when no postcard could be emitted.
    pub block: bool,
    pub packets: u32,
    pub bits: u64,
}

/// What a hop did to a packet carrying a telemetry block.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    /// The record to report out of band, on postcard hops.
    postcard: Option<HopRecord>,
}

/// Updates the telemetry block of every packet passing through its gates and exports postcards.
#[derive(Debug)]
pub struct Forwarder {
    options: ForwarderOptions,
    gates: GateRegistry,
    ring: PostcardRing,
    /// Sequence number of the next postcard.
    seq: u32,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new(ForwarderOptions::default())
    }
}

impl Forwarder {
    pub fn new(options: ForwarderOptions) -> Self {
        let ring = PostcardRing::with_capacity(options.ring_capacity);
        Self { options, gates: GateRegistry::new(), ring, seq: 0 }
    }

    #[inline]
    pub fn node_id(&self) -> u8 {
        self.options.node_id
    }

    #[inline]
    pub fn gates(&self) -> &GateRegistry {
        &self.gates
    }

    #[inline]
    pub fn gates_mut(&mut self) -> &mut GateRegistry {
        &mut self.gates
    }

    #[inline]
    pub fn ring(&self) -> &PostcardRing {
        &self.ring
    }

    #[inline]
    pub fn ring_mut(&mut self) -> &mut PostcardRing {
        &mut self.ring
    }

    /// Processes a batch arriving on `gate` at time `now` (microseconds). Every packet is
    /// forwarded on the same gate; batches on unregistered gates are dropped whole.
    pub fn process(&mut self, gate: GateId, mut batch: PacketBatch, now: u64) -> ProcessOutcome {
        let Some(group) = self.gates.get(gate) else {
            debug!(gate, len = batch.len(), "dropping batch on unregistered gate");
            return ProcessOutcome { gate, dropped: batch.len(), ..Default::default() };
        };
        let group = group.clone();

        let mut outcome = ProcessOutcome { gate, ..Default::default() };
        let mut bytes = 0;

        for pkt in batch.iter_mut() {
            if let Some(stamp) = stamp(&group, self.options.node_id, pkt, now) {
                if let Some(record) = stamp.postcard {
                    match self.offer_postcard(&group, &record, pkt, now) {
                        Offer::Accepted { evicted } => {
                            outcome.postcards += 1;
                            outcome.evicted += evicted;
                        }
                        Offer::Dropped { evicted } => {
                            outcome.postcards_dropped += 1;
                            outcome.evicted += evicted;
                        }
                    }
                }

                relocate(&group, pkt);
            }

            bytes += pkt.len();
        }

        if let Some(group) = self.gates.get_mut(gate) {
            group.counters.account(batch.len(), bytes, now);
        }

        outcome.batch = batch;
        outcome
    }

    /// Builds a postcard for `pkt` directly in the ring buffer.
    fn offer_postcard(
        &mut self,
        group: &GateGroup,
        record: &HopRecord,
        pkt: &Packet,
        leave_time: u64,
    ) -> Offer {
        let data = pkt.data();
        let (head, tail) = capture_ranges(group, data.len());
        let len = POSTCARD_HEADER_LEN + head.len() + tail.len();

        if len > self.options.max_packet_size {
            trace!(len, max = self.options.max_packet_size, "postcard too large");
            return Offer::Dropped { evicted: 0 };
        }

        let header = PostcardHeader {
            version: POSTCARD_VERSION,
            next_protocol: group.next_protocol,
            node_id: self.options.node_id,
            ingress: record.ingress,
            egress: record.egress,
            seq: self.seq,
            leave_time: leave_time as u32,
        };

        let mut raw_header = [0u8; POSTCARD_HEADER_LEN];
        if let Err(e) = header.encode(&mut raw_header) {
            debug!(?e, "failed to encode postcard header");
            return Offer::Dropped { evicted: 0 };
        }

        let offer = self.ring.offer_with(len, |dst| {
            let (dst_header, body) = dst.split_at_mut(POSTCARD_HEADER_LEN);
            dst_header.copy_from_slice(&raw_header);
            let (dst_head, dst_tail) = body.split_at_mut(head.len());
            dst_head.copy_from_slice(&data[head]);
            dst_tail.copy_from_slice(&data[tail]);
        });

        if offer.is_accepted() {
            self.seq = self.seq.wrapping_add(1);
        }

        offer
    }

    /// Moves up to `max` queued postcards into packets obtained from `alloc`, oldest first.
    /// Stops early if allocation fails; the remaining postcards stay queued.
    pub fn run_postcard_task<A: PacketAllocator>(
        &mut self,
        alloc: &mut A,
        max: usize,
    ) -> (TaskResult, PacketBatch) {
        let mut batch = PacketBatch::with_capacity(max.min(MAX_BURST));
        let mut bytes = 0;

        while batch.len() < max {
            let Some(entry) = self.ring.front() else {
                break;
            };

            let Some(mut pkt) = alloc.alloc(entry.len()) else {
                debug!(queued = self.ring.len(), "postcard allocation failed");
                break;
            };

            pkt.data_mut().extend_from_slice(entry);
            bytes += entry.len();
            self.ring.pop_front();
            batch.push(pkt);
        }

        let result = TaskResult {
            block: batch.is_empty(),
            packets: batch.len() as u32,
            bits: bytes as u64 * 8,
        };

        (result, batch)
    }
}

/// Stamps this hop into the packet's telemetry block. Returns `None` if there is no block at the
/// gate's read position. A full block is still reported as present.
fn stamp(group: &GateGroup, node_id: u8, pkt: &mut Packet, now: u64) -> Option<Stamp> {
    let read = group.read_pos;
    let opened_here = pkt.meta().ingress_record;
    if group.is_egress() {
        pkt.meta_mut().ingress_record = None;
    }

    let data: &mut BytesMut = pkt.data_mut();
    if !data.get(read..).is_some_and(telemetry::is_present) {
        trace!(len = data.len(), read, "no telemetry block");
        return None;
    }

    let mut block = BlockMut::new(&mut data[read..]).ok()?;
    let header = block.header();
    let count = block.count();

    // The ingress of this node opened the latest record during this traversal: complete it.
    let completes = group.is_egress() &&
        count > 0 &&
        opened_here == Some(count as u8 - 1) &&
        block.record(count - 1).is_some_and(|r| r.node_id == node_id);

    let (index, opens) = if completes { (count - 1, false) } else { (count, true) };
    let postcard = header.postcard && group.is_egress();

    let full = index >= MAX_RECORDS;
    if full {
        trace!(count, postcard, "telemetry block full");
        if !postcard {
            return Some(Stamp { postcard: None });
        }
    }

    let mut record = match block.record(index) {
        Some(record) if !opens => record,
        _ => HopRecord { node_id, ..Default::default() },
    };

    if group.is_ingress() {
        record.ingress = group.report_id;
    } else {
        record.egress = group.report_id;
    }

    if !postcard {
        match header.metric() {
            Some(MetricType::Latency) => {
                if group.is_ingress() {
                    record.value = now as u16;
                } else if completes {
                    record.value = (now as u16).wrapping_sub(record.value);
                }
            }
            Some(metric) if metric.is_ingress_rate() == group.is_ingress() => {
                let counter = if metric.is_byte_rate() {
                    group.counters.bytes
                } else {
                    group.counters.packets
                };
                record.value = u16::try_from(counter).unwrap_or(u16::MAX);
            }
            Some(metric) => trace!(?metric, direction = ?group.direction, "rate not measured here"),
            None => trace!(code = header.metric, "unknown measurement type"),
        }
    }

    if !full {
        block.set_record(index, &record).ok()?;
        // Postcard hops report out of band and leave the chain length untouched.
        if opens && !postcard {
            block.set_count((index + 1) as u8);
            if group.is_ingress() {
                pkt.meta_mut().ingress_record = Some(index as u8);
            }
        }
    }

    Some(Stamp { postcard: postcard.then_some(record) })
}

/// Moves the block from the gate's read to its write position, then applies the gate's rewrite.
fn relocate(group: &GateGroup, pkt: &mut Packet) {
    let data = pkt.data_mut();

    if group.read_pos != group.write_pos {
        if let Err(e) = splice::move_window(data, group.read_pos, group.write_pos, BLOCK_LEN) {
            trace!(?e, "cannot relocate telemetry block");
        }
    }

    if let Some(rewrite) = &group.rewrite {
        match data.get_mut(rewrite.pos..rewrite.pos + rewrite.bytes.len()) {
            Some(dst) => dst.copy_from_slice(&rewrite.bytes),
            None => trace!(pos = rewrite.pos, len = data.len(), "rewrite out of bounds"),
        }
    }
}

/// Returns the two byte ranges of a `len`-byte packet captured in a postcard: everything before
/// the telemetry block, then what follows it up to the truncation position.
fn capture_ranges(
    group: &GateGroup,
    len: usize,
) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    let (read, truncate) = (group.read_pos, group.truncate_pos);

    if read < truncate {
        let tail_start = (read + BLOCK_LEN).min(len);
        let tail_end = (truncate + BLOCK_LEN).min(len);
        (0..read.min(len), tail_start..tail_end.max(tail_start))
    } else {
        (0..truncate.min(len), 0..0)
    }
}
