use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use super::{
    Command, GatedBatch, NodeDriver, NodeError, NodeOptions, NodeStats, Response,
    DEFAULT_BUFFER_SIZE,
};
use crate::{
    timer::TimerStat, Classifier, ConfigError, Direction, FlowSpecArg, Forwarder, GateId, Packet,
    PacketBatch,
};

/// A telemetry node running on its own Tokio task.
///
/// The handle configures the node and feeds it batches. Processed batches come out of
/// [`Node::output`], drained postcards out of [`Node::postcards`]. Dropping the handle shuts the
/// node down.
#[derive(Debug)]
pub struct Node {
    /// Command channel to the driver.
    to_driver: mpsc::Sender<Command>,
    /// Batch channel to the driver.
    to_input: mpsc::Sender<GatedBatch>,
    /// Processed batches, until taken.
    from_output: Option<mpsc::Receiver<GatedBatch>>,
    /// Drained postcards, until taken.
    from_postcards: Option<mpsc::Receiver<Packet>>,
    /// Statistics shared with the driver.
    stats: Arc<NodeStats>,
}

impl Node {
    /// Spawns the driver of a node made of `classifier` and `forwarder` on the current Tokio
    /// runtime.
    pub fn spawn(classifier: Classifier, forwarder: Forwarder, options: NodeOptions) -> Self {
        let (to_driver, from_handle) = mpsc::channel(DEFAULT_BUFFER_SIZE);
        let (to_input, from_input) = mpsc::channel(options.input_buffer_size);
        let (to_output, from_output) = mpsc::channel(options.output_buffer_size);
        let (to_postcards, from_postcards) = mpsc::channel(options.postcard_buffer_size);

        let stats = Arc::new(NodeStats::default());
        let options = Arc::new(options);

        let driver = NodeDriver {
            options: Arc::clone(&options),
            stats: Arc::clone(&stats),
            classifier,
            forwarder,
            from_handle,
            from_input,
            to_output: PollSender::new(to_output),
            to_postcards,
            drain_timer: tokio::time::interval(options.drain_interval),
            timer_stat: options.timer_stat.clone().map(TimerStat::new),
        };

        tokio::spawn(driver);

        Self {
            to_driver,
            to_input,
            from_output: Some(from_output),
            from_postcards: Some(from_postcards),
            stats,
        }
    }

    /// Appends flow specs to the classifier, all or nothing.
    pub async fn add_flow_specs(&self, specs: Vec<FlowSpecArg>) -> Result<(), NodeError> {
        self.request(|response| Command::AddFlowSpecs { specs, response }).await
    }

    pub async fn clear_flow_specs(&self) -> Result<(), NodeError> {
        self.request(|response| Command::ClearFlowSpecs { response }).await
    }

    /// Registers a gate group. `direction` is the raw gate type: 0 for ingress, 1 for egress.
    pub async fn add_gate_group(
        &self,
        gate: GateId,
        direction: u32,
        report_id: u8,
        reset_interval: u64,
    ) -> Result<(), NodeError> {
        self.request(|response| Command::AddGateGroup {
            gate,
            direction,
            report_id,
            reset_interval,
            response,
        })
        .await
    }

    /// Registers an ingress gate group.
    pub async fn add_ingress_gate(
        &self,
        gate: GateId,
        report_id: u8,
        reset_interval: u64,
    ) -> Result<(), NodeError> {
        self.add_gate_group(gate, Direction::Ingress as u32, report_id, reset_interval).await
    }

    /// Registers an egress gate group.
    pub async fn add_egress_gate(
        &self,
        gate: GateId,
        report_id: u8,
        reset_interval: u64,
    ) -> Result<(), NodeError> {
        self.add_gate_group(gate, Direction::Egress as u32, report_id, reset_interval).await
    }

    pub async fn set_positions(
        &self,
        gate: GateId,
        read_pos: usize,
        write_pos: usize,
    ) -> Result<(), NodeError> {
        self.request(|response| Command::SetPositions { gate, read_pos, write_pos, response }).await
    }

    pub async fn set_postcard(
        &self,
        gate: GateId,
        truncate_pos: usize,
        next_protocol: u8,
    ) -> Result<(), NodeError> {
        self.request(|response| Command::SetPostcard {
            gate,
            truncate_pos,
            next_protocol,
            response,
        })
        .await
    }

    pub async fn set_rewrite(
        &self,
        gate: GateId,
        pos: usize,
        bytes: Bytes,
    ) -> Result<(), NodeError> {
        self.request(|response| Command::SetRewrite { gate, pos, bytes, response }).await
    }

    pub async fn clear_gate_groups(&self) -> Result<(), NodeError> {
        self.request(|response| Command::ClearGateGroups { response }).await
    }

    /// Sends a command and waits for the driver to apply it.
    async fn request(&self, command: impl FnOnce(Response) -> Command) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel::<Result<(), ConfigError>>();

        self.to_driver.send(command(tx)).await.map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)??;

        Ok(())
    }

    /// Sends a batch arriving on `gate`, waiting for room on the input.
    pub async fn send(&self, gate: GateId, batch: PacketBatch) -> Result<(), NodeError> {
        self.to_input.send(GatedBatch::new(gate, batch)).await.map_err(|_| NodeError::Closed)
    }

    /// Sends a batch arriving on `gate` if the input has room.
    pub fn try_send(&self, gate: GateId, batch: PacketBatch) -> Result<(), NodeError> {
        use mpsc::error::TrySendError::*;
        self.to_input.try_send(GatedBatch::new(gate, batch)).map_err(|e| match e {
            Full(_) => NodeError::ChannelFull,
            Closed(_) => NodeError::Closed,
        })
    }

    /// Takes the stream of processed batches. Returns `None` if it was already taken.
    pub fn output(&mut self) -> Option<ReceiverStream<GatedBatch>> {
        self.from_output.take().map(ReceiverStream::new)
    }

    /// Takes the stream of drained postcards. Returns `None` if it was already taken.
    pub fn postcards(&mut self) -> Option<ReceiverStream<Packet>> {
        self.from_postcards.take().map(ReceiverStream::new)
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Try to tell the driver to gracefully shut down.
        let _ = self.to_driver.try_send(Command::Shutdown);
    }
}
