use std::collections::VecDeque;

use bytes::Bytes;
use tracing::trace;

/// Outcome of offering an entry to a [`PostcardRing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The entry was queued after evicting the given number of older entries.
    Accepted { evicted: usize },
    /// The entry could not be placed even in an empty buffer. Evicted entries are lost as well.
    Dropped { evicted: usize },
}

impl Offer {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    #[inline]
    pub fn evicted(&self) -> usize {
        match self {
            Self::Accepted { evicted } | Self::Dropped { evicted } => *evicted,
        }
    }
}

/// A fixed-capacity circular byte store for pending postcards.
///
/// Entries are contiguous `(start, end)` ranges of a single buffer, queued in FIFO order. An entry
/// never straddles the physical end of the buffer and live entries never overlap. When a new
/// entry does not fit, the oldest entries are evicted until it does.
#[derive(Debug)]
pub struct PostcardRing {
    buf: Box<[u8]>,
    /// Live entries, oldest first.
    queue: VecDeque<(usize, usize)>,
}

impl PostcardRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: vec![0; capacity].into_boxed_slice(), queue: VecDeque::new() }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the number of queued entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Returns the number of bytes held by queued entries.
    pub fn used(&self) -> usize {
        self.queue.iter().map(|(start, end)| end - start).sum()
    }

    /// Returns the queued byte ranges, oldest first.
    pub fn ranges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.queue.iter().copied()
    }

    /// Queues a copy of `entry`.
    pub fn offer(&mut self, entry: &[u8]) -> Offer {
        self.offer_with(entry.len(), |dst| dst.copy_from_slice(entry))
    }

    /// Reserves `len` bytes, evicting old entries as needed, and lets `fill` write the entry in
    /// place. Zero-length entries are dropped.
    pub fn offer_with(&mut self, len: usize, fill: impl FnOnce(&mut [u8])) -> Offer {
        if len == 0 {
            return Offer::Dropped { evicted: 0 };
        }

        let mut evicted = 0;
        let start = loop {
            if let Some(start) = self.placement(len) {
                break start;
            }

            if self.queue.pop_front().is_none() {
                trace!(len, capacity = self.capacity(), "postcard larger than buffer");
                return Offer::Dropped { evicted };
            }
            evicted += 1;
        };

        fill(&mut self.buf[start..start + len]);
        self.queue.push_back((start, start + len));

        if evicted > 0 {
            trace!(len, evicted, "evicted postcards to make room");
        }

        Offer::Accepted { evicted }
    }

    /// Finds the offset at which an entry of `len` bytes fits without touching live entries.
    fn placement(&self, len: usize) -> Option<usize> {
        let (Some(&(head, _)), Some(&(_, tail))) = (self.queue.front(), self.queue.back()) else {
            return (len <= self.capacity()).then_some(0);
        };

        if tail > head {
            // Live bytes are [head, tail): free space after the newest entry, then at the front.
            if len <= self.capacity() - tail {
                Some(tail)
            } else if len <= head {
                Some(0)
            } else {
                None
            }
        } else {
            // Wrapped: live bytes are [head, cap) and [0, tail).
            (len <= head - tail).then_some(tail)
        }
    }

    /// Returns the oldest entry without removing it.
    #[inline]
    pub fn front(&self) -> Option<&[u8]> {
        self.queue.front().map(|&(start, end)| &self.buf[start..end])
    }

    /// Discards the oldest entry. Returns whether there was one.
    #[inline]
    pub fn pop_front(&mut self) -> bool {
        self.queue.pop_front().is_some()
    }

    /// Returns a lazy iterator over at most `max` entries, oldest first. Each entry is removed
    /// as it is yielded; entries not pulled stay queued.
    pub fn drain(&mut self, max: usize) -> Drain<'_> {
        Drain { ring: self, remaining: max }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Iterator returned by [`PostcardRing::drain`].
#[derive(Debug)]
pub struct Drain<'a> {
    ring: &'a mut PostcardRing,
    remaining: usize,
}

impl Iterator for Drain<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let entry = Bytes::copy_from_slice(self.ring.front()?);
        self.ring.pop_front();
        self.remaining -= 1;

        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.remaining.min(self.ring.len());
        (len, Some(len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut ring = PostcardRing::with_capacity(100);

        assert_eq!(ring.offer(&[1; 40]), Offer::Accepted { evicted: 0 });
        assert_eq!(ring.offer(&[2; 40]), Offer::Accepted { evicted: 0 });
        assert_eq!(ring.offer(&[3; 40]), Offer::Accepted { evicted: 1 });

        assert_eq!(ring.len(), 2);
        assert_eq!(ring.ranges().collect::<Vec<_>>(), [(40, 80), (0, 40)]);

        let drained: Vec<_> = ring.drain(usize::MAX).collect();
        assert_eq!(drained, [Bytes::from(vec![2; 40]), Bytes::from(vec![3; 40])]);
        assert!(ring.is_empty());
    }

    #[test]
    fn within_capacity_never_evicts() {
        let mut ring = PostcardRing::with_capacity(64);
        for len in [10, 20, 30, 4] {
            assert_eq!(ring.offer(&vec![len as u8; len]), Offer::Accepted { evicted: 0 });
        }
        assert_eq!(ring.used(), 64);

        // One more byte forces the oldest out.
        assert_eq!(ring.offer(&[0xff]), Offer::Accepted { evicted: 1 });
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn wrapped_placement() {
        let mut ring = PostcardRing::with_capacity(100);
        ring.offer(&[1; 50]);
        ring.offer(&[2; 40]);
        ring.pop_front();

        // Doesn't fit after [50, 90), wraps to the front.
        assert_eq!(ring.offer(&[3; 30]), Offer::Accepted { evicted: 0 });
        // Wrapped: [30, 50) is free.
        assert_eq!(ring.offer(&[4; 20]), Offer::Accepted { evicted: 0 });
        assert_eq!(ring.ranges().collect::<Vec<_>>(), [(50, 90), (0, 30), (30, 50)]);

        // Needs the space held by [50, 90).
        assert_eq!(ring.offer(&[5; 10]), Offer::Accepted { evicted: 1 });
        assert_eq!(ring.ranges().last(), Some((50, 60)));
    }

    #[test]
    fn oversize_empties_queue_and_drops() {
        let mut ring = PostcardRing::with_capacity(32);
        ring.offer(&[1; 16]);
        ring.offer(&[2; 16]);

        assert_eq!(ring.offer(&[3; 33]), Offer::Dropped { evicted: 2 });
        assert!(ring.is_empty());

        assert_eq!(ring.offer(&[]), Offer::Dropped { evicted: 0 });

        // After emptying, the whole buffer is available again.
        assert_eq!(ring.offer(&[4; 32]), Offer::Accepted { evicted: 0 });
        assert_eq!(ring.ranges().collect::<Vec<_>>(), [(0, 32)]);
    }

    #[test]
    fn drain_is_lazy_and_restartable() {
        let mut ring = PostcardRing::with_capacity(256);
        for i in 0..5u8 {
            ring.offer(&[i; 8]);
        }

        let mut drain = ring.drain(3);
        assert_eq!(drain.size_hint(), (3, Some(3)));
        assert_eq!(drain.next(), Some(Bytes::from(vec![0; 8])));
        drop(drain);
        assert_eq!(ring.len(), 4);

        let rest: Vec<_> = ring.drain(10).collect();
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0], Bytes::from(vec![1; 8]));
        assert_eq!(rest[3], Bytes::from(vec![4; 8]));
        assert_eq!(ring.drain(10).next(), None);
    }
}
