use std::{net::Ipv4Addr, time::Duration};

use bytes::Bytes;
use nft_common::layout::L4_PAYLOAD_OFFSET;
use nft_node::{
    Classifier, ConfigError, FlowSpecArg, Forwarder, ForwarderOptions, GatedBatch, Node,
    NodeError, NodeOptions,
};
use nft_wire::{
    postcard::Postcard,
    telemetry::{record_offset, HopRecord, TelemetryHeader, BLOCK_LEN},
    MetricType,
};
use tokio::time::timeout;
use tokio_stream::StreamExt;

use crate::{batch_of, udp_from};

const WAIT: Duration = Duration::from_secs(1);

fn spawn(node_id: u8) -> Node {
    Node::spawn(
        Classifier::default(),
        Forwarder::new(ForwarderOptions::default().node_id(node_id)),
        NodeOptions::default(),
    )
}

fn latency_arg() -> FlowSpecArg {
    FlowSpecArg {
        src_ip: "10.0.0.0/8".to_string(),
        tele_types: vec![MetricType::Latency as u32],
        ..Default::default()
    }
}

#[tokio::test]
async fn configuration_errors() {
    let _ = tracing_subscriber::fmt::try_init();

    let node = spawn(1);

    node.add_ingress_gate(0, 1, 1000).await.unwrap();
    assert!(matches!(
        node.add_egress_gate(0, 2, 1000).await,
        Err(NodeError::Config(ConfigError::AlreadyExists(0)))
    ));
    assert!(matches!(
        node.add_gate_group(1, 7, 2, 1000).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));
    assert!(matches!(
        node.add_egress_gate(1, 16, 1000).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));

    assert!(matches!(
        node.set_positions(9, 0, 0).await,
        Err(NodeError::Config(ConfigError::NotFound(9)))
    ));
    assert!(matches!(
        node.set_postcard(0, 64, 16).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));
    assert!(matches!(
        node.set_rewrite(0, 0, Bytes::from(vec![0; 65])).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));
    node.set_rewrite(0, 0, Bytes::from_static(&[1, 2, 3])).await.unwrap();

    let bad = FlowSpecArg { src_ip: "10.0.0.300/8".to_string(), ..latency_arg() };
    assert!(matches!(
        node.add_flow_specs(vec![latency_arg(), bad]).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));
    let no_metrics = FlowSpecArg { tele_types: vec![], ..latency_arg() };
    assert!(matches!(
        node.add_flow_specs(vec![no_metrics]).await,
        Err(NodeError::Config(ConfigError::InvalidArgument(_)))
    ));
    node.add_flow_specs(vec![latency_arg()]).await.unwrap();

    node.clear_gate_groups().await.unwrap();
    node.add_ingress_gate(0, 1, 1000).await.unwrap();
    node.clear_flow_specs().await.unwrap();
}

#[tokio::test]
async fn ingress_tags_matching_flow() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = spawn(1);
    let mut output = node.output().unwrap();
    assert!(node.output().is_none());

    node.add_ingress_gate(0, 1, 1000).await.unwrap();
    node.add_flow_specs(vec![latency_arg()]).await.unwrap();

    let tagged = udp_from(Ipv4Addr::new(10, 1, 2, 3));
    let untagged = udp_from(Ipv4Addr::new(11, 1, 2, 3));
    let mut batch = batch_of(&tagged, 1);
    batch.push(nft_node::Packet::from_slice(&untagged));
    node.send(0, batch).await.unwrap();

    let GatedBatch { gate, batch } = timeout(WAIT, output.next()).await.unwrap().unwrap();
    assert_eq!(gate, 0);
    assert_eq!(batch.len(), 2);

    let pkt = batch.get(0).unwrap();
    assert_eq!(pkt.len(), tagged.len() + BLOCK_LEN);
    let block = &pkt.data()[L4_PAYLOAD_OFFSET..];
    let header = TelemetryHeader::decode(block).unwrap();
    assert_eq!(header.metric(), Some(MetricType::Latency));
    assert_eq!(header.count, 1);

    let record = HopRecord::decode(&block[record_offset(0)..]).unwrap();
    assert_eq!((record.node_id, record.ingress, record.egress), (1, 1, 0));

    assert_eq!(batch.get(1).unwrap().data(), &untagged[..]);

    let stats = node.stats();
    assert_eq!(stats.batches_rx(), 1);
    assert_eq!(stats.packets_rx(), 2);
    assert_eq!(stats.packets_tagged(), 1);
    assert_eq!(stats.packets_tx(), 2);
}

#[tokio::test]
async fn unregistered_gate_drops_batch() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = spawn(1);
    let mut output = node.output().unwrap();
    node.add_ingress_gate(0, 1, 1000).await.unwrap();

    let frame = udp_from(Ipv4Addr::new(10, 0, 0, 1));
    node.send(5, batch_of(&frame, 3)).await.unwrap();
    node.send(0, batch_of(&frame, 2)).await.unwrap();

    // Batches are handled in order, so the first one was dropped by the time this arrives.
    let out = timeout(WAIT, output.next()).await.unwrap().unwrap();
    assert_eq!(out.gate, 0);
    assert_eq!(out.batch.len(), 2);

    assert_eq!(node.stats().packets_rx(), 5);
    assert_eq!(node.stats().packets_dropped(), 3);
    assert_eq!(node.stats().packets_tx(), 2);
}

#[tokio::test]
async fn postcards_are_drained() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = spawn(4);
    let mut output = node.output().unwrap();
    let mut postcards = node.postcards().unwrap();

    node.add_ingress_gate(0, 1, 1000).await.unwrap();
    node.add_egress_gate(1, 3, 1000).await.unwrap();
    node.add_flow_specs(vec![FlowSpecArg { is_postcard: true, ..Default::default() }])
        .await
        .unwrap();

    let frame = udp_from(Ipv4Addr::new(10, 1, 2, 3));
    node.send(0, batch_of(&frame, 3)).await.unwrap();
    let ingress = timeout(WAIT, output.next()).await.unwrap().unwrap();

    // Route the packets out of the node.
    node.send(1, ingress.batch).await.unwrap();
    let egress = timeout(WAIT, output.next()).await.unwrap().unwrap();
    assert_eq!(egress.gate, 1);
    for pkt in &egress.batch {
        let header = TelemetryHeader::decode(&pkt.data()[L4_PAYLOAD_OFFSET..]).unwrap();
        assert!(header.postcard);
        assert_eq!(header.count, 1);
    }

    for seq in 0..3 {
        let pkt = timeout(WAIT, postcards.next()).await.unwrap().unwrap();
        let postcard = Postcard::from_bytes(pkt.freeze()).unwrap();

        let header = postcard.header();
        assert_eq!(header.node_id, 4);
        assert_eq!((header.ingress, header.egress), (1, 3));
        assert_eq!(header.seq, seq);
        assert_eq!(postcard.body(), &frame[..L4_PAYLOAD_OFFSET]);
    }

    let stats = node.stats();
    assert_eq!(stats.postcards_generated(), 3);
    assert_eq!(stats.postcards_tx(), 3);
    assert_eq!(stats.postcards_evicted(), 0);
}

#[tokio::test]
async fn closed_after_output_dropped() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut node = spawn(1);
    node.add_ingress_gate(0, 1, 1000).await.unwrap();
    drop(node.output().unwrap());

    let frame = udp_from(Ipv4Addr::new(10, 0, 0, 1));
    let _ = node.send(0, batch_of(&frame, 1)).await;

    // The driver stops once it finds the output closed.
    let closed = timeout(WAIT, async {
        loop {
            if let Err(NodeError::Closed) = node.clear_flow_specs().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(closed.is_ok());
}
