//! Packets crossing several nodes, driven synchronously.

use std::net::Ipv4Addr;

use nft_common::{layout::L4_PAYLOAD_OFFSET, Ipv4Prefix};
use nft_node::{
    Classifier, ClassifierOptions, Direction, FlowSpec, Forwarder, ForwarderOptions, GateId,
    HeapAllocator, Packet, PacketBatch,
};
use nft_wire::{
    postcard::Postcard,
    telemetry::{record_offset, HopRecord, TelemetryHeader, BLOCK_LEN, MAX_RECORDS},
    MetricType,
};

use crate::{batch_of, udp_from};

const IN: GateId = 0;
const OUT: GateId = 1;

/// One pipeline node: a classifier in front of a forwarder with an ingress and an egress gate.
struct Hop {
    classifier: Classifier,
    forwarder: Forwarder,
}

impl Hop {
    fn new(node_id: u8, specs: Vec<FlowSpec>) -> Self {
        let mut classifier = Classifier::new(ClassifierOptions::default());
        classifier.add_specs(specs).unwrap();

        let mut forwarder = Forwarder::new(ForwarderOptions::default().node_id(node_id));
        forwarder.gates_mut().register(IN, Direction::Ingress, 1, 1_000_000).unwrap();
        forwarder.gates_mut().register(OUT, Direction::Egress, 2, 1_000_000).unwrap();

        Self { classifier, forwarder }
    }

    /// Runs a batch through ingress at `t_in` and egress at `t_out`.
    fn cross(&mut self, mut batch: PacketBatch, t_in: u64, t_out: u64) -> PacketBatch {
        self.classifier.process(&mut batch);
        let batch = self.forwarder.process(IN, batch, t_in).batch;
        self.forwarder.process(OUT, batch, t_out).batch
    }
}

fn latency_spec() -> FlowSpec {
    FlowSpec::new("10.0.0.0/8".parse().unwrap(), Ipv4Prefix::any()).metrics([MetricType::Latency])
}

fn header(pkt: &Packet) -> TelemetryHeader {
    TelemetryHeader::decode(&pkt.data()[L4_PAYLOAD_OFFSET..]).unwrap()
}

fn record(pkt: &Packet, index: usize) -> HopRecord {
    HopRecord::decode(&pkt.data()[L4_PAYLOAD_OFFSET + record_offset(index)..]).unwrap()
}

fn first(batch: PacketBatch) -> Packet {
    batch.into_iter().next().unwrap()
}

#[test]
fn tagged_then_stamped_on_ingress() {
    let frame = udp_from(Ipv4Addr::new(10, 1, 2, 3));

    let mut classifier = Classifier::default();
    classifier.add_specs([latency_spec()]).unwrap();
    let mut forwarder = Forwarder::new(ForwarderOptions::default().node_id(3));
    forwarder.gates_mut().register(0, Direction::Ingress, 1, 1000).unwrap();

    let mut batch = batch_of(&frame, 1);
    assert_eq!(classifier.process(&mut batch), 1);

    let inserted = header(batch.get(0).unwrap());
    assert_eq!(inserted.metric(), Some(MetricType::Latency));
    assert_eq!(inserted.count, 0);

    let pkt = first(forwarder.process(0, batch, 123_456).batch);
    assert_eq!(header(&pkt).count, 1);
    assert_eq!(
        record(&pkt, 0),
        HopRecord { node_id: 3, ingress: 1, egress: 0, value: 123_456u64 as u16 }
    );
}

#[test]
fn latency_across_two_nodes() {
    let _ = tracing_subscriber::fmt::try_init();

    let frame = udp_from(Ipv4Addr::new(10, 1, 2, 3));
    let mut first_hop = Hop::new(1, vec![latency_spec()]);
    // Downstream nodes only forward: their classifier has no specs.
    let mut second_hop = Hop::new(2, vec![]);

    let batch = first_hop.cross(batch_of(&frame, 1), 10_000, 10_250);
    let batch = second_hop.cross(batch, 20_000, 20_040);
    let pkt = first(batch);

    assert_eq!(pkt.len(), frame.len() + BLOCK_LEN);

    let header = header(&pkt);
    assert_eq!(header.metric(), Some(MetricType::Latency));
    assert!(!header.postcard);
    assert_eq!(header.count, 2);

    assert_eq!(record(&pkt, 0), HopRecord { node_id: 1, ingress: 1, egress: 2, value: 250 });
    assert_eq!(record(&pkt, 1), HopRecord { node_id: 2, ingress: 1, egress: 2, value: 40 });

    // The original payload follows the block unchanged.
    assert_eq!(&pkt.data()[L4_PAYLOAD_OFFSET + BLOCK_LEN..], &frame[L4_PAYLOAD_OFFSET..]);
}

#[test]
fn unmatched_flow_is_not_tagged() {
    let frame = udp_from(Ipv4Addr::new(172, 16, 0, 1));
    let mut hop = Hop::new(1, vec![latency_spec()]);

    let pkt = first(hop.cross(batch_of(&frame, 1), 0, 10));
    assert_eq!(pkt.data(), &frame[..]);
}

#[test]
fn second_classifier_does_not_retag() {
    let frame = udp_from(Ipv4Addr::new(10, 9, 9, 9));
    let mut first_hop = Hop::new(1, vec![latency_spec()]);
    let mut second_hop = Hop::new(2, vec![latency_spec()]);

    let batch = first_hop.cross(batch_of(&frame, 1), 0, 5);
    let pkt = first(second_hop.cross(batch, 100, 107));

    assert_eq!(pkt.len(), frame.len() + BLOCK_LEN);
    assert_eq!(header(&pkt).count, 2);
    assert_eq!(record(&pkt, 1).value, 7);
}

#[test]
fn block_saturates_after_max_records() {
    let frame = udp_from(Ipv4Addr::new(10, 0, 0, 7));
    let mut batch = Hop::new(1, vec![latency_spec()]).cross(batch_of(&frame, 1), 0, 1);

    for node_id in 2..=(MAX_RECORDS as u8 + 3) {
        batch = Hop::new(node_id, vec![]).cross(batch, 0, 1);
    }

    let pkt = first(batch);
    assert_eq!(header(&pkt).count as usize, MAX_RECORDS);
    assert_eq!(record(&pkt, MAX_RECORDS - 1).node_id, MAX_RECORDS as u8);
}

#[test]
fn ingress_packet_rate_reports_previous_batches() {
    let frame = udp_from(Ipv4Addr::new(10, 0, 0, 1));
    let spec = FlowSpec::new("10.0.0.0/8".parse().unwrap(), Ipv4Prefix::any())
        .metrics([MetricType::IngressPacketRate]);
    let mut hop = Hop::new(1, vec![spec]);

    let batch = hop.cross(batch_of(&frame, 4), 0, 1);
    assert!(batch.iter().all(|pkt| record(pkt, 0).value == 0));

    // The ingress gate has seen the four packets of the first batch.
    let batch = hop.cross(batch_of(&frame, 2), 2, 3);
    for pkt in &batch {
        assert_eq!(record(pkt, 0), HopRecord { node_id: 1, ingress: 1, egress: 2, value: 4 });
    }
}

#[test]
fn postcard_flow_exports_at_every_egress() {
    let _ = tracing_subscriber::fmt::try_init();

    let frame = udp_from(Ipv4Addr::new(10, 3, 3, 3));
    let spec = FlowSpec::new(Ipv4Prefix::any(), Ipv4Prefix::any()).postcard();
    let mut first_hop = Hop::new(1, vec![spec]);
    let mut second_hop = Hop::new(2, vec![]);

    let batch = first_hop.cross(batch_of(&frame, 1), 0, 0x1_0000_0005);
    let pkt = first(second_hop.cross(batch, 0, 6));

    assert!(header(&pkt).postcard);

    for (hop, node_id, leave_time) in [(&mut first_hop, 1, 5), (&mut second_hop, 2, 6)] {
        assert_eq!(hop.forwarder.ring().len(), 1);

        let (result, postcards) = hop.forwarder.run_postcard_task(&mut HeapAllocator, 8);
        assert_eq!(result.packets, 1);
        assert!(hop.forwarder.ring().is_empty());

        let postcard = Postcard::from_bytes(first(postcards).freeze()).unwrap();
        let header = postcard.header();
        assert_eq!(header.node_id, node_id);
        assert_eq!((header.ingress, header.egress), (1, 2));
        assert_eq!(header.seq, 0);
        assert_eq!(header.leave_time, leave_time);

        // Headers up to the block, without the block itself.
        assert_eq!(postcard.body(), &frame[..L4_PAYLOAD_OFFSET]);
    }
}
