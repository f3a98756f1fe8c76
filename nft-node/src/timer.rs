//! Per-packet timestamps around a section of the pipeline, and their aggregation.
//!
//! A [`Timer`] of kind [`TimerKind::Start`] placed before the measured section stamps every
//! packet's arrival time and batch size, one of kind [`TimerKind::End`] placed after it stamps the
//! departure time. A [`TimerStat`] then reads both and periodically reports the average time spent
//! per packet.

use std::time::Duration;

use tracing::info;

use crate::PacketBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Stamps `arrival_ts` and `batch_size`.
    Start,
    /// Stamps `departure_ts`.
    End,
}

#[derive(Debug, Clone, Copy)]
pub struct Timer {
    kind: TimerKind,
}

impl Timer {
    pub fn new(kind: TimerKind) -> Self {
        Self { kind }
    }

    #[inline]
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Stamps every packet of the batch with the same timestamp.
    pub fn stamp(&self, batch: &mut PacketBatch, now: u64) {
        let size = batch.len() as u32;
        for pkt in batch.iter_mut() {
            let meta = pkt.meta_mut();
            match self.kind {
                TimerKind::Start => {
                    meta.arrival_ts = now;
                    meta.batch_size = size;
                }
                TimerKind::End => meta.departure_ts = now,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimerStatOptions {
    /// How often aggregated statistics are reported and reset.
    report_interval: Duration,
}

impl Default for TimerStatOptions {
    fn default() -> Self {
        Self { report_interval: Duration::from_secs(1) }
    }
}

impl TimerStatOptions {
    /// Sets the report interval.
    pub fn report_interval(mut self, report_interval: Duration) -> Self {
        self.report_interval = report_interval;
        self
    }
}

/// Statistics over one report interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerReport {
    /// Sum of the per-batch section times, in microseconds.
    pub elapsed: u64,
    /// Number of packets in the sampled batches.
    pub packets: u64,
}

impl TimerReport {
    /// Average section time per packet, in microseconds.
    pub fn per_packet(&self) -> f64 {
        if self.packets == 0 {
            return 0.0;
        }

        self.elapsed as f64 / self.packets as f64
    }
}

/// Aggregates the timestamps left by a pair of [`Timer`]s.
///
/// Each batch is sampled through its first packet, which carries the batch-wide timestamps.
#[derive(Debug, Default)]
pub struct TimerStat {
    options: TimerStatOptions,
    elapsed: u64,
    packets: u64,
    /// Start of the current interval. `None` until the first batch.
    last_report: Option<u64>,
}

impl TimerStat {
    pub fn new(options: TimerStatOptions) -> Self {
        Self { options, ..Default::default() }
    }

    /// Accounts for a batch observed at `now` (microseconds). Returns the aggregated statistics
    /// when the report interval has elapsed, and starts a new interval.
    pub fn record(&mut self, batch: &PacketBatch, now: u64) -> Option<TimerReport> {
        let meta = batch.get(0)?.meta();
        self.elapsed += meta.departure_ts.saturating_sub(meta.arrival_ts);
        self.packets += u64::from(meta.batch_size);

        let Some(last) = self.last_report else {
            self.last_report = Some(now);
            return None;
        };

        if now.saturating_sub(last) <= self.options.report_interval.as_micros() as u64 {
            return None;
        }

        let report = TimerReport { elapsed: self.elapsed, packets: self.packets };
        info!(
            elapsed = report.elapsed,
            packets = report.packets,
            per_packet = report.per_packet(),
            "timer statistics"
        );

        self.elapsed = 0;
        self.packets = 0;
        self.last_report = Some(now);

        Some(report)
    }
}
