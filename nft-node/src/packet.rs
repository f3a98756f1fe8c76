use bytes::{Bytes, BytesMut};

/// Index of a gate (an ingress or egress attachment point) on a pipeline node.
pub type GateId = u16;

/// The maximum number of packets in a batch.
pub const MAX_BURST: usize = 32;

/// The default maximum packet size, large enough for jumbo frames.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 9216;

/// Per-packet scratch fields written and read by the pipeline stages while a packet crosses a
/// node. These never appear on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Timestamp at which the packet entered the measured section, in microseconds.
    pub arrival_ts: u64,
    /// Timestamp at which the packet left the measured section, in microseconds.
    pub departure_ts: u64,
    /// Size of the batch the packet arrived in.
    pub batch_size: u32,
    /// Index of the hop record opened by the last ingress gate. Cleared at egress.
    pub ingress_record: Option<u8>,
}

/// A packet owned by the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    data: BytesMut,
    meta: Metadata,
}

impl Packet {
    pub fn new(data: BytesMut) -> Self {
        Self { data, meta: Metadata::default() }
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::new(BytesMut::from(data))
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn meta(&self) -> &Metadata {
        &self.meta
    }

    #[inline]
    pub fn meta_mut(&mut self) -> &mut Metadata {
        &mut self.meta
    }

    /// Consumes the packet, returning its bytes.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

/// A batch of packets, processed together by every stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketBatch {
    pkts: Vec<Packet>,
}

impl PacketBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { pkts: Vec::with_capacity(capacity) }
    }

    #[inline]
    pub fn push(&mut self, pkt: Packet) {
        self.pkts.push(pkt);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pkts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pkts.is_empty()
    }

    /// Sum of the lengths of all packets in the batch.
    pub fn total_bytes(&self) -> usize {
        self.pkts.iter().map(Packet::len).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.pkts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Packet> {
        self.pkts.iter_mut()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Packet> {
        self.pkts.get(index)
    }

    pub fn into_vec(self) -> Vec<Packet> {
        self.pkts
    }
}

impl From<Vec<Packet>> for PacketBatch {
    fn from(pkts: Vec<Packet>) -> Self {
        Self { pkts }
    }
}

impl FromIterator<Packet> for PacketBatch {
    fn from_iter<I: IntoIterator<Item = Packet>>(iter: I) -> Self {
        Self { pkts: iter.into_iter().collect() }
    }
}

impl IntoIterator for PacketBatch {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkts.into_iter()
    }
}

impl<'a> IntoIterator for &'a PacketBatch {
    type Item = &'a Packet;
    type IntoIter = std::slice::Iter<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkts.iter()
    }
}

impl<'a> IntoIterator for &'a mut PacketBatch {
    type Item = &'a mut Packet;
    type IntoIter = std::slice::IterMut<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.pkts.iter_mut()
    }
}

/// Source of fresh packets for stages that originate traffic, such as postcard export.
///
/// Allocation may fail (for example when a pool is exhausted); callers stop early and retry on
/// their next invocation.
pub trait PacketAllocator {
    /// Returns an empty packet able to hold `len` bytes, or `None` if none is available.
    fn alloc(&mut self, len: usize) -> Option<Packet>;
}

/// Allocates every packet on the heap. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl PacketAllocator for HeapAllocator {
    #[inline]
    fn alloc(&mut self, len: usize) -> Option<Packet> {
        Some(Packet::new(BytesMut::with_capacity(len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_accounting() {
        let batch: PacketBatch =
            [&b"abc"[..], &b"defgh"[..]].into_iter().map(Packet::from_slice).collect();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.total_bytes(), 8);
        assert_eq!(batch.get(1).map(Packet::data), Some(&b"defgh"[..]));
    }

    #[test]
    fn heap_allocator_capacity() {
        let pkt = HeapAllocator.alloc(128).unwrap();
        assert!(pkt.is_empty());
        assert!(pkt.data.capacity() >= 128);
    }
}
