use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::debug;

use nft_common::layout::L4_PAYLOAD_OFFSET;

use crate::{ConfigError, GateId};

/// The maximum length of a gate's fixed-content rewrite.
pub const MAX_REWRITE_LEN: usize = 64;

/// Next-protocol value for postcards whose captured bytes start with an Ethernet header.
pub const PROTO_ETHERNET: u8 = 0;

/// Whether a gate sees packets entering or leaving the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Ingress = 0,
    Egress = 1,
}

impl TryFrom<u32> for Direction {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ingress),
            1 => Ok(Self::Egress),
            _ => Err(ConfigError::invalid(format!("invalid gate type: {value}"))),
        }
    }
}

/// A fixed byte string written over the packet at `pos` before emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub pos: usize,
    pub bytes: Bytes,
}

/// Fixed-window packet and byte counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub packets: u64,
    pub bytes: u64,
    /// Start of the current window, in microseconds. `None` until the first batch.
    pub last_reset: Option<u64>,
    /// Window length in microseconds.
    pub interval: u64,
}

impl Counters {
    /// Adds a processed batch, then restarts the window if it has been open longer than the
    /// interval.
    pub fn account(&mut self, packets: usize, bytes: usize, now: u64) {
        self.packets = self.packets.saturating_add(packets as u64);
        self.bytes = self.bytes.saturating_add(bytes as u64);

        match self.last_reset {
            None => self.last_reset = Some(now),
            Some(last) if now.saturating_sub(last) > self.interval => {
                self.packets = 0;
                self.bytes = 0;
                self.last_reset = Some(now);
            }
            Some(_) => {}
        }
    }
}

/// Per-gate configuration and running state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateGroup {
    pub direction: Direction,
    /// 4-bit tag stamped into hop records.
    pub report_id: u8,
    /// Offset at which this gate expects the telemetry block.
    pub read_pos: usize,
    /// Offset at which the telemetry block must be left when the packet is emitted.
    pub write_pos: usize,
    /// Number of leading packet bytes (telemetry block excluded) captured in a postcard.
    pub truncate_pos: usize,
    /// Protocol of the first captured header, carried in the postcard header.
    pub next_protocol: u8,
    pub rewrite: Option<Rewrite>,
    pub counters: Counters,
}

impl GateGroup {
    pub fn new(direction: Direction, report_id: u8, reset_interval: u64) -> Self {
        Self {
            direction,
            report_id,
            read_pos: L4_PAYLOAD_OFFSET,
            write_pos: L4_PAYLOAD_OFFSET,
            truncate_pos: L4_PAYLOAD_OFFSET,
            next_protocol: PROTO_ETHERNET,
            rewrite: None,
            counters: Counters { interval: reset_interval, ..Default::default() },
        }
    }

    #[inline]
    pub fn is_ingress(&self) -> bool {
        self.direction == Direction::Ingress
    }

    #[inline]
    pub fn is_egress(&self) -> bool {
        self.direction == Direction::Egress
    }
}

/// Gate groups keyed by gate id.
#[derive(Debug, Default)]
pub struct GateRegistry {
    gates: FxHashMap<GateId, GateGroup>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new gate group. Duplicate ids are rejected, never overwritten.
    pub fn register(
        &mut self,
        gate: GateId,
        direction: Direction,
        report_id: u8,
        reset_interval: u64,
    ) -> Result<(), ConfigError> {
        if report_id > 0x0f {
            return Err(ConfigError::invalid(format!("report id must fit in 4 bits: {report_id}")));
        }

        if self.gates.contains_key(&gate) {
            return Err(ConfigError::AlreadyExists(gate));
        }

        debug!(gate, ?direction, report_id, reset_interval, "registered gate group");
        self.gates.insert(gate, GateGroup::new(direction, report_id, reset_interval));
        Ok(())
    }

    /// Sets where the gate reads the telemetry block and where it leaves it.
    pub fn configure_positions(
        &mut self,
        gate: GateId,
        read_pos: usize,
        write_pos: usize,
    ) -> Result<(), ConfigError> {
        let group = self.gates.get_mut(&gate).ok_or(ConfigError::NotFound(gate))?;
        group.read_pos = read_pos;
        group.write_pos = write_pos;
        Ok(())
    }

    /// Sets the postcard truncation position and next-protocol value (4 bits).
    pub fn configure_postcard(
        &mut self,
        gate: GateId,
        truncate_pos: usize,
        next_protocol: u8,
    ) -> Result<(), ConfigError> {
        if next_protocol > 0x0f {
            return Err(ConfigError::invalid(format!(
                "next protocol must fit in 4 bits: {next_protocol}"
            )));
        }

        let group = self.gates.get_mut(&gate).ok_or(ConfigError::NotFound(gate))?;
        group.truncate_pos = truncate_pos;
        group.next_protocol = next_protocol;
        Ok(())
    }

    /// Sets a fixed-content rewrite applied to every telemetry packet leaving the gate. An empty
    /// byte string removes the rewrite.
    pub fn configure_rewrite(
        &mut self,
        gate: GateId,
        pos: usize,
        bytes: Bytes,
    ) -> Result<(), ConfigError> {
        if bytes.len() > MAX_REWRITE_LEN {
            return Err(ConfigError::invalid(format!(
                "rewrite content too long: {} > {MAX_REWRITE_LEN}",
                bytes.len()
            )));
        }

        let group = self.gates.get_mut(&gate).ok_or(ConfigError::NotFound(gate))?;
        group.rewrite = (!bytes.is_empty()).then_some(Rewrite { pos, bytes });
        Ok(())
    }

    pub fn clear_all(&mut self) {
        debug!(len = self.gates.len(), "clearing gate groups");
        self.gates.clear();
    }

    #[inline]
    pub fn get(&self, gate: GateId) -> Option<&GateGroup> {
        self.gates.get(&gate)
    }

    #[inline]
    pub fn get_mut(&mut self, gate: GateId) -> Option<&mut GateGroup> {
        self.gates.get_mut(&gate)
    }

    #[inline]
    pub fn contains(&self, gate: GateId) -> bool {
        self.gates.contains_key(&gate)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
