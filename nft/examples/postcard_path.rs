use std::{net::Ipv4Addr, time::Duration};

use futures::SinkExt;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::codec::{FramedRead, FramedWrite};

use nft::{
    constants::KiB,
    postcard::Codec,
    telemetry::{record_offset, HopRecord, TelemetryHeader},
    Classifier, FlowSpecArg, Forwarder, ForwarderOptions, GatedBatch, MetricType, Node,
    NodeOptions, Packet, PacketBatch,
};
use nft_sim::FrameBuilder;

const INGRESS: u16 = 0;
const EGRESS: u16 = 1;
const BLOCK_OFFSET: usize = 42;

/// A node and the stream of batches it emits.
struct Hop {
    node: Node,
    output: ReceiverStream<GatedBatch>,
}

impl Hop {
    async fn spawn(node_id: u8) -> Self {
        let forwarder = Forwarder::new(
            ForwarderOptions::default().node_id(node_id).ring_capacity(64 * KiB as usize),
        );
        let mut node = Node::spawn(Classifier::default(), forwarder, NodeOptions::default());
        let output = node.output().unwrap();

        node.add_ingress_gate(INGRESS, 1, 1_000_000).await.unwrap();
        node.add_egress_gate(EGRESS, 2, 1_000_000).await.unwrap();

        Self { node, output }
    }

    /// Sends a batch in through the ingress gate and out through the egress gate.
    async fn cross(&mut self, batch: PacketBatch) -> PacketBatch {
        self.node.send(INGRESS, batch).await.unwrap();
        let inside = self.output.next().await.unwrap();

        self.node.send(EGRESS, inside.batch).await.unwrap();
        self.output.next().await.unwrap().batch
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let mut edge = Hop::spawn(1).await;
    let mut core = Hop::spawn(2).await;

    // DNS traffic is reported out of band, everything else from 10/8 carries latency records.
    edge.node
        .add_flow_specs(vec![
            FlowSpecArg { dst_port: 53, is_postcard: true, ..Default::default() },
            FlowSpecArg {
                src_ip: "10.0.0.0/8".to_string(),
                tele_types: vec![MetricType::Latency as u32],
                ..Default::default()
            },
        ])
        .await
        .unwrap();

    let mut rng = rand::thread_rng();
    let batch: PacketBatch = (0..8u8)
        .map(|i| {
            let dst_port = if i % 2 == 0 { 53 } else { 8080 };
            let frame = FrameBuilder::new()
                .src(Ipv4Addr::new(10, 0, 0, i + 1))
                .ports(40_000 + i as u16, dst_port)
                .random_payload(&mut rng, 128)
                .build();
            Packet::new(frame)
        })
        .collect();

    let batch = edge.cross(batch).await;
    let batch = core.cross(batch).await;

    for pkt in &batch {
        let block = &pkt.data()[BLOCK_OFFSET..];
        let header = TelemetryHeader::decode(block).unwrap();
        if header.postcard {
            continue;
        }

        let hops: Vec<_> = (0..header.count as usize)
            .map(|i| HopRecord::decode(&block[record_offset(i)..]).unwrap())
            .map(|r| (r.node_id, r.value))
            .collect();
        println!("latency per hop (node, us): {hops:?}");
    }

    // Ship every postcard to a collector as length-delimited frames.
    let mut writer = FramedWrite::new(Vec::new(), Codec::new());
    for hop in [&mut edge, &mut core] {
        let mut postcards = hop.node.postcards().unwrap().take(4);
        while let Ok(Some(pkt)) = tokio::time::timeout(Duration::from_secs(1), postcards.next()).await
        {
            writer.send(pkt.freeze()).await.unwrap();
        }
    }

    let wire = writer.into_inner();
    let mut reader = FramedRead::new(&wire[..], Codec::new());
    while let Some(postcard) = reader.next().await {
        let postcard = postcard.unwrap();
        let header = postcard.header();
        println!(
            "postcard #{} from node {} (gates {}->{}), {} bytes captured",
            header.seq,
            header.node_id,
            header.ingress,
            header.egress,
            postcard.body().len()
        );
    }

    println!("edge stats: {:?}", edge.node.stats());
}
