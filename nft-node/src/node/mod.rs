use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{timer::TimerStatOptions, ConfigError, FlowSpecArg, GateId, PacketBatch, MAX_BURST};

mod driver;
use driver::NodeDriver;

mod handle;
pub use handle::*;

mod stats;
pub use stats::NodeStats;

/// The default buffer size for the node channels.
const DEFAULT_BUFFER_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Node closed")]
    Closed,
    #[error("Channel full")]
    ChannelFull,
}

/// A batch of packets together with the gate it arrives on or leaves through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatedBatch {
    pub gate: GateId,
    pub batch: PacketBatch,
}

impl GatedBatch {
    pub fn new(gate: GateId, batch: PacketBatch) -> Self {
        Self { gate, batch }
    }
}

type Response = oneshot::Sender<Result<(), ConfigError>>;

/// Administrative commands, applied by the driver between batches.
#[derive(Debug)]
pub(crate) enum Command {
    AddFlowSpecs { specs: Vec<FlowSpecArg>, response: Response },
    ClearFlowSpecs { response: Response },
    AddGateGroup {
        gate: GateId,
        direction: u32,
        report_id: u8,
        reset_interval: u64,
        response: Response,
    },
    SetPositions { gate: GateId, read_pos: usize, write_pos: usize, response: Response },
    SetPostcard { gate: GateId, truncate_pos: usize, next_protocol: u8, response: Response },
    SetRewrite { gate: GateId, pos: usize, bytes: Bytes, response: Response },
    ClearGateGroups { response: Response },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// How often queued postcards are drained to the postcard output.
    drain_interval: Duration,
    /// The maximum number of postcards emitted per drain.
    drain_batch_size: usize,
    /// The number of batches that can be buffered on the input.
    input_buffer_size: usize,
    /// The number of batches that can be buffered on the output.
    output_buffer_size: usize,
    /// The number of postcards that can be buffered on the postcard output.
    postcard_buffer_size: usize,
    /// If set, the time spent per packet in the node is aggregated and reported.
    timer_stat: Option<TimerStatOptions>,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_millis(1),
            drain_batch_size: MAX_BURST,
            input_buffer_size: DEFAULT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_BUFFER_SIZE,
            postcard_buffer_size: DEFAULT_BUFFER_SIZE,
            timer_stat: None,
        }
    }
}

impl NodeOptions {
    /// Sets the interval at which postcards are drained.
    pub fn drain_interval(mut self, drain_interval: Duration) -> Self {
        self.drain_interval = drain_interval;
        self
    }

    /// Sets the maximum number of postcards emitted per drain. Drains are further bounded by the
    /// free capacity of the postcard output.
    pub fn drain_batch_size(mut self, drain_batch_size: usize) -> Self {
        self.drain_batch_size = drain_batch_size;
        self
    }

    /// Sets the input channel buffer size.
    pub fn input_buffer_size(mut self, input_buffer_size: usize) -> Self {
        self.input_buffer_size = input_buffer_size;
        self
    }

    /// Sets the output channel buffer size. When the output is full, the node stops reading
    /// its input.
    pub fn output_buffer_size(mut self, output_buffer_size: usize) -> Self {
        self.output_buffer_size = output_buffer_size;
        self
    }

    /// Sets the postcard channel buffer size. When it is full, postcards stay in the ring
    /// buffer, where they may be evicted.
    pub fn postcard_buffer_size(mut self, postcard_buffer_size: usize) -> Self {
        self.postcard_buffer_size = postcard_buffer_size;
        self
    }

    /// Enables per-packet timing statistics.
    pub fn timer_stat(mut self, options: TimerStatOptions) -> Self {
        self.timer_stat = Some(options);
        self
    }
}
