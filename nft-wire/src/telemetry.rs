//! The in-packet telemetry block.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       preamble (0x7f4e4654)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |version| type|P|     count     |   node id     |ingress|egress |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            value              |   node id     |ingress|egress | ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The block is [`BLOCK_LEN`] bytes: a [`HEADER_LEN`]-byte header followed by room for
//! [`MAX_RECORDS`] hop records of [`RECORD_LEN`] bytes each. Its length never changes once
//! inserted.

use bytes::{Buf, BufMut};

use crate::{ensure_len, Error, MetricType};

/// The preamble, `0x7f 'N' 'F' 'T'`.
pub const MAGIC: u32 = 0x7f4e_4654;
/// The only header version emitted.
pub const VERSION: u8 = 0;
/// Length of the header preamble in bytes.
pub const HEADER_LEN: usize = 6;
/// Length of a single hop record in bytes.
pub const RECORD_LEN: usize = 4;
/// Length of the whole block inserted into a packet.
pub const BLOCK_LEN: usize = 36;
/// The maximum number of hop records a block can carry.
pub const MAX_RECORDS: usize = (BLOCK_LEN - HEADER_LEN) / RECORD_LEN;

const NIBBLE: u8 = 0x0f;

/// Decoded telemetry header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHeader {
    /// Header version (4 bits).
    pub version: u8,
    /// Raw measurement-type code (3 bits). See [`TelemetryHeader::metric`].
    pub metric: u8,
    /// Whether hops should export postcards instead of accumulating records.
    pub postcard: bool,
    /// Number of hop records following the header.
    pub count: u8,
}

impl TelemetryHeader {
    /// A header requesting the given measurement from every hop.
    #[inline]
    pub const fn request(metric: MetricType) -> Self {
        Self { version: VERSION, metric: metric as u8, postcard: false, count: 0 }
    }

    /// A header flagged for postcard export.
    #[inline]
    pub const fn postcard() -> Self {
        Self { version: VERSION, metric: 0, postcard: true, count: 0 }
    }

    /// Returns the requested measurement, or `None` if the code is not assigned.
    #[inline]
    pub fn metric(&self) -> Option<MetricType> {
        MetricType::try_from(self.metric).ok()
    }

    /// Writes the header into the first [`HEADER_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<(), Error> {
        ensure_len(dst, HEADER_LEN)?;

        let mut dst = &mut dst[..HEADER_LEN];
        dst.put_u32(MAGIC);
        dst.put_u8(
            ((self.version & NIBBLE) << 4) | ((self.metric & 0x07) << 1) | u8::from(self.postcard),
        );
        dst.put_u8(self.count);

        Ok(())
    }

    /// Reads a header from the start of `src`, validating the preamble.
    pub fn decode(src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, HEADER_LEN)?;

        let mut src = &src[..HEADER_LEN];
        let magic = src.get_u32();
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }

        let flags = src.get_u8();
        Ok(Self {
            version: flags >> 4,
            metric: (flags >> 1) & 0x07,
            postcard: flags & 0x01 == 0x01,
            count: src.get_u8(),
        })
    }
}

/// Returns `true` if `src` starts with a complete telemetry block.
#[inline]
pub fn is_present(src: &[u8]) -> bool {
    src.len() >= BLOCK_LEN && src[..4] == MAGIC.to_be_bytes()
}

/// A per-hop measurement record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HopRecord {
    /// The reporting node.
    pub node_id: u8,
    /// Ingress tag (4 bits), zero if unset.
    pub ingress: u8,
    /// Egress tag (4 bits), zero if unset.
    pub egress: u8,
    /// Latency mark, latency delta or rate, depending on the requested measurement.
    pub value: u16,
}

impl HopRecord {
    #[inline]
    pub fn from_bytes(raw: [u8; RECORD_LEN]) -> Self {
        Self {
            node_id: raw[0],
            ingress: raw[1] >> 4,
            egress: raw[1] & NIBBLE,
            value: u16::from_be_bytes([raw[2], raw[3]]),
        }
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let value = self.value.to_be_bytes();
        [self.node_id, ((self.ingress & NIBBLE) << 4) | (self.egress & NIBBLE), value[0], value[1]]
    }

    pub fn decode(src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, RECORD_LEN)?;
        Ok(Self::from_bytes([src[0], src[1], src[2], src[3]]))
    }

    pub fn encode(&self, dst: &mut [u8]) -> Result<(), Error> {
        ensure_len(dst, RECORD_LEN)?;
        dst[..RECORD_LEN].copy_from_slice(&self.to_bytes());
        Ok(())
    }
}

/// Byte offset of record `index` relative to the start of the block.
#[inline]
pub const fn record_offset(index: usize) -> usize {
    HEADER_LEN + index * RECORD_LEN
}

/// A mutable view over a telemetry block embedded in a packet.
#[derive(Debug)]
pub struct BlockMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> BlockMut<'a> {
    /// Wraps an existing block. Fails if `buf` is shorter than [`BLOCK_LEN`] or the preamble does
    /// not match.
    pub fn new(buf: &'a mut [u8]) -> Result<Self, Error> {
        ensure_len(buf, BLOCK_LEN)?;
        TelemetryHeader::decode(buf)?;

        Ok(Self { buf: &mut buf[..BLOCK_LEN] })
    }

    /// Initializes a fresh block in `buf` with the given header and an empty record region.
    pub fn init(buf: &'a mut [u8], header: TelemetryHeader) -> Result<Self, Error> {
        ensure_len(buf, BLOCK_LEN)?;

        let buf = &mut buf[..BLOCK_LEN];
        buf.fill(0);
        header.encode(buf)?;

        Ok(Self { buf })
    }

    /// Returns the decoded header.
    #[inline]
    pub fn header(&self) -> TelemetryHeader {
        let flags = self.buf[4];
        TelemetryHeader {
            version: flags >> 4,
            metric: (flags >> 1) & 0x07,
            postcard: flags & 0x01 == 0x01,
            count: self.buf[5],
        }
    }

    /// Returns the number of records written so far.
    #[inline]
    pub fn count(&self) -> usize {
        self.buf[5] as usize
    }

    #[inline]
    pub fn set_count(&mut self, count: u8) {
        self.buf[5] = count;
    }

    /// Returns the record at `index`, or `None` if the index lies outside the record region.
    pub fn record(&self, index: usize) -> Option<HopRecord> {
        if index >= MAX_RECORDS {
            return None;
        }

        let off = record_offset(index);
        let raw = &self.buf[off..off + RECORD_LEN];
        Some(HopRecord::from_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Overwrites the record at `index`.
    pub fn set_record(&mut self, index: usize, record: &HopRecord) -> Result<(), Error> {
        if index >= MAX_RECORDS {
            return Err(Error::OutOfBounds {
                offset: record_offset(index),
                len: RECORD_LEN,
                bound: BLOCK_LEN,
            });
        }

        let off = record_offset(index);
        self.buf[off..off + RECORD_LEN].copy_from_slice(&record.to_bytes());
        Ok(())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_bit_packing() {
        let header = TelemetryHeader { version: 0x3, metric: 4, postcard: true, count: 9 };
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf).unwrap();

        assert_eq!(&buf[..4], &[0x7f, b'N', b'F', b'T']);
        // 0011 100 1
        assert_eq!(buf[4], 0b0011_1001);
        assert_eq!(buf[5], 9);

        assert_eq!(TelemetryHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let buf = [0xde, 0xad, 0xbe, 0xef, 0, 0];
        assert!(matches!(TelemetryHeader::decode(&buf), Err(Error::BadMagic(0xdeadbeef))));
        assert!(matches!(
            TelemetryHeader::decode(&buf[..3]),
            Err(Error::Truncated { need: HEADER_LEN, have: 3 })
        ));
    }

    #[test]
    fn unassigned_metric_code() {
        let mut buf = [0u8; HEADER_LEN];
        TelemetryHeader { version: 0, metric: 6, postcard: false, count: 0 }
            .encode(&mut buf)
            .unwrap();
        assert_eq!(TelemetryHeader::decode(&buf).unwrap().metric(), None);
    }

    #[test]
    fn record_bit_packing() {
        let record = HopRecord { node_id: 7, ingress: 0xa, egress: 0x5, value: 0x1234 };
        assert_eq!(record.to_bytes(), [7, 0xa5, 0x12, 0x34]);
        assert_eq!(HopRecord::from_bytes(record.to_bytes()), record);

        // Tags are truncated to their nibble.
        let wide = HopRecord { node_id: 1, ingress: 0x1f, egress: 0xf2, value: 0 };
        assert_eq!(wide.to_bytes()[1], 0xf2);
    }

    #[test]
    fn block_records() {
        assert_eq!(MAX_RECORDS, 7);

        let mut buf = [0xffu8; BLOCK_LEN + 4];
        let mut block =
            BlockMut::init(&mut buf, TelemetryHeader::request(MetricType::EgressByteRate))
                .unwrap();
        assert_eq!(block.count(), 0);
        assert_eq!(block.record(0), Some(HopRecord::default()));

        let record = HopRecord { node_id: 2, ingress: 1, egress: 0, value: 99 };
        block.set_record(6, &record).unwrap();
        block.set_count(7);
        assert!(block.set_record(7, &record).is_err());
        assert_eq!(block.record(7), None);
        assert_eq!(block.record(6), Some(record));
        assert_eq!(block.header().metric(), Some(MetricType::EgressByteRate));

        // Bytes past the block are untouched.
        assert_eq!(&buf[BLOCK_LEN..], &[0xff; 4]);
        assert_eq!(&buf[record_offset(6)..record_offset(6) + RECORD_LEN], &[2, 0x10, 0, 99]);
    }

    #[test]
    fn block_presence() {
        let mut buf = [0u8; BLOCK_LEN];
        assert!(!is_present(&buf));
        BlockMut::init(&mut buf, TelemetryHeader::postcard()).unwrap();
        assert!(is_present(&buf));
        assert!(!is_present(&buf[..BLOCK_LEN - 1]));
        assert!(BlockMut::new(&mut buf).unwrap().header().postcard);
    }
}
