use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use tokio::sync::mpsc;
use tokio_util::sync::PollSender;
use tracing::{debug, trace, warn};

use nft_common::unix_micros;

use super::{Command, GatedBatch, NodeOptions, NodeStats};
use crate::{
    timer::{Timer, TimerKind, TimerStat},
    Classifier, Direction, Forwarder, HeapAllocator, Packet,
};

/// The node driver. Endless future that applies administrative commands, moves batches from
/// the input through the classifier and forwarder to the output, and drains postcards.
pub(crate) struct NodeDriver {
    /// Options shared with the node handle.
    pub(crate) options: Arc<NodeOptions>,
    /// Statistics shared with the node handle.
    pub(crate) stats: Arc<NodeStats>,
    pub(crate) classifier: Classifier,
    pub(crate) forwarder: Forwarder,
    /// Commands from the node handle.
    pub(crate) from_handle: mpsc::Receiver<Command>,
    /// Incoming batches.
    pub(crate) from_input: mpsc::Receiver<GatedBatch>,
    /// Outgoing batches. A slot is reserved before a batch is taken from the input.
    pub(crate) to_output: PollSender<GatedBatch>,
    /// Drained postcards.
    pub(crate) to_postcards: mpsc::Sender<Packet>,
    /// Ticks whenever postcards should be drained.
    pub(crate) drain_timer: tokio::time::Interval,
    /// Per-packet timing statistics, if enabled.
    pub(crate) timer_stat: Option<TimerStat>,
}

impl NodeDriver {
    fn on_command(&mut self, cmd: Command) {
        let gates = self.forwarder.gates_mut();

        match cmd {
            Command::AddFlowSpecs { specs, response } => {
                let _ = response.send(self.classifier.add_spec_args(specs));
            }
            Command::ClearFlowSpecs { response } => {
                self.classifier.clear();
                let _ = response.send(Ok(()));
            }
            Command::AddGateGroup { gate, direction, report_id, reset_interval, response } => {
                let res = Direction::try_from(direction).and_then(|direction| {
                    gates.register(gate, direction, report_id, reset_interval)
                });
                let _ = response.send(res);
            }
            Command::SetPositions { gate, read_pos, write_pos, response } => {
                let _ = response.send(gates.configure_positions(gate, read_pos, write_pos));
            }
            Command::SetPostcard { gate, truncate_pos, next_protocol, response } => {
                let _ = response.send(gates.configure_postcard(gate, truncate_pos, next_protocol));
            }
            Command::SetRewrite { gate, pos, bytes, response } => {
                let _ = response.send(gates.configure_rewrite(gate, pos, bytes));
            }
            Command::ClearGateGroups { response } => {
                gates.clear_all();
                let _ = response.send(Ok(()));
            }
            // Handled by the poll loop.
            Command::Shutdown => {}
        }
    }

    /// Runs one batch through the node. Returns the batch to emit, if any.
    fn on_batch(&mut self, GatedBatch { gate, mut batch }: GatedBatch) -> Option<GatedBatch> {
        let now = unix_micros();
        self.stats.increment_rx(batch.len());

        if self.timer_stat.is_some() {
            Timer::new(TimerKind::Start).stamp(&mut batch, now);
        }

        let Some(group) = self.forwarder.gates().get(gate) else {
            debug!(gate, len = batch.len(), "dropping batch on unregistered gate");
            self.stats.increment_dropped(batch.len());
            return None;
        };

        // Telemetry is inserted where packets enter the node.
        if group.is_ingress() {
            let tagged = self.classifier.process(&mut batch);
            self.stats.increment_tagged(tagged);
        }

        let outcome = self.forwarder.process(gate, batch, now);
        self.stats.increment_postcards(
            outcome.postcards,
            outcome.evicted,
            outcome.postcards_dropped,
        );

        let mut batch = outcome.batch;
        if let Some(stat) = self.timer_stat.as_mut() {
            let now = unix_micros();
            Timer::new(TimerKind::End).stamp(&mut batch, now);
            stat.record(&batch, now);
        }

        trace!(gate, len = batch.len(), postcards = outcome.postcards, "processed batch");
        Some(GatedBatch::new(outcome.gate, batch))
    }

    /// Moves queued postcards to the postcard output, bounded by its free capacity.
    fn drain_postcards(&mut self) {
        if self.forwarder.ring().is_empty() || self.to_postcards.is_closed() {
            return;
        }

        let budget = self.options.drain_batch_size.min(self.to_postcards.capacity());
        if budget == 0 {
            trace!(queued = self.forwarder.ring().len(), "postcard output full");
            return;
        }

        let (result, postcards) = self.forwarder.run_postcard_task(&mut HeapAllocator, budget);
        if result.block {
            return;
        }

        let mut sent = 0;
        for pkt in postcards {
            if let Err(e) = self.to_postcards.try_send(pkt) {
                warn!(err = ?e, "failed to emit postcard");
                break;
            }
            sent += 1;
        }

        trace!(sent, bits = result.bits, "drained postcards");
        self.stats.increment_postcards_tx(sent);
    }
}

impl Future for NodeDriver {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            // Commands are applied first so they take effect before the next batch.
            match this.from_handle.poll_recv(cx) {
                Poll::Ready(Some(Command::Shutdown)) | Poll::Ready(None) => {
                    debug!("Node dropped, shutting down driver");
                    this.drain_postcards();
                    return Poll::Ready(());
                }
                Poll::Ready(Some(cmd)) => {
                    this.on_command(cmd);
                    continue;
                }
                Poll::Pending => {}
            }

            if this.drain_timer.poll_tick(cx).is_ready() {
                this.drain_postcards();
                continue;
            }

            match this.to_output.poll_reserve(cx) {
                Poll::Ready(Ok(())) => match this.from_input.poll_recv(cx) {
                    Poll::Ready(Some(batch)) => {
                        if let Some(out) = this.on_batch(batch) {
                            let len = out.batch.len();
                            if this.to_output.send_item(out).is_err() {
                                warn!("Output closed, shutting down driver");
                                return Poll::Ready(());
                            }
                            this.stats.increment_tx(len);
                        }

                        continue;
                    }
                    Poll::Ready(None) => {
                        debug!("Input closed, shutting down driver");
                        this.drain_postcards();
                        return Poll::Ready(());
                    }
                    Poll::Pending => {}
                },
                Poll::Ready(Err(_)) => {
                    warn!("Output closed, shutting down driver");
                    return Poll::Ready(());
                }
                Poll::Pending => {}
            }

            return Poll::Pending;
        }
    }
}
