use std::sync::atomic::{AtomicUsize, Ordering};

/// Statistics for a node. These are shared between the driver task and the [`Node`] handle.
///
/// [`Node`]: super::Node
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Batches received on the input
    batches_rx: AtomicUsize,
    /// Packets received on the input
    packets_rx: AtomicUsize,
    /// Packets emitted on the output
    packets_tx: AtomicUsize,
    /// Packets dropped on unregistered gates
    packets_dropped: AtomicUsize,
    /// Packets tagged by the classifier
    packets_tagged: AtomicUsize,
    /// Postcards queued in the ring buffer
    postcards_generated: AtomicUsize,
    /// Postcards evicted from the ring buffer before being drained
    postcards_evicted: AtomicUsize,
    /// Postcards that could not be queued at all
    postcards_dropped: AtomicUsize,
    /// Postcards emitted on the postcard output
    postcards_tx: AtomicUsize,
}

impl NodeStats {
    #[inline]
    pub(crate) fn increment_rx(&self, packets: usize) {
        self.batches_rx.fetch_add(1, Ordering::Relaxed);
        self.packets_rx.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tx(&self, packets: usize) {
        self.packets_tx.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_dropped(&self, packets: usize) {
        self.packets_dropped.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_tagged(&self, packets: usize) {
        self.packets_tagged.fetch_add(packets, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_postcards(&self, generated: usize, evicted: usize, dropped: usize) {
        self.postcards_generated.fetch_add(generated, Ordering::Relaxed);
        self.postcards_evicted.fetch_add(evicted, Ordering::Relaxed);
        self.postcards_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_postcards_tx(&self, postcards: usize) {
        self.postcards_tx.fetch_add(postcards, Ordering::Relaxed);
    }

    #[inline]
    pub fn batches_rx(&self) -> usize {
        self.batches_rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_rx(&self) -> usize {
        self.packets_rx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_tx(&self) -> usize {
        self.packets_tx.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_dropped(&self) -> usize {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn packets_tagged(&self) -> usize {
        self.packets_tagged.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn postcards_generated(&self) -> usize {
        self.postcards_generated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn postcards_evicted(&self) -> usize {
        self.postcards_evicted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn postcards_dropped(&self) -> usize {
        self.postcards_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn postcards_tx(&self) -> usize {
        self.postcards_tx.load(Ordering::Relaxed)
    }
}
