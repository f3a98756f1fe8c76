//! Out-of-band postcards.
//!
//! A postcard is a [`PostcardHeader`] followed by a truncated copy of the packet that triggered
//! it, with the telemetry block removed. The [`Codec`] frames postcards on a byte stream as a
//! `u16` length followed by the postcard bytes, for shipping them to a collector.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{ensure_len, Error};

/// The only postcard version emitted.
pub const POSTCARD_VERSION: u8 = 0;
/// Length of the postcard header in bytes.
pub const POSTCARD_HEADER_LEN: usize = 11;

/// Decoded postcard header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostcardHeader {
    /// Postcard version (4 bits).
    pub version: u8,
    /// Protocol of the first captured header (4 bits).
    pub next_protocol: u8,
    /// The reporting node.
    pub node_id: u8,
    /// Ingress tag copied from the triggering hop record (4 bits).
    pub ingress: u8,
    /// Egress tag copied from the triggering hop record (4 bits).
    pub egress: u8,
    /// Per-node postcard sequence number.
    pub seq: u32,
    /// Departure timestamp, in microseconds (truncated to 32 bits).
    pub leave_time: u32,
}

impl PostcardHeader {
    /// Writes the header into the first [`POSTCARD_HEADER_LEN`] bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) -> Result<(), Error> {
        ensure_len(dst, POSTCARD_HEADER_LEN)?;

        let mut dst = &mut dst[..POSTCARD_HEADER_LEN];
        dst.put_u8(((self.version & 0x0f) << 4) | (self.next_protocol & 0x0f));
        dst.put_u8(self.node_id);
        dst.put_u8(((self.ingress & 0x0f) << 4) | (self.egress & 0x0f));
        dst.put_u32(self.seq);
        dst.put_u32(self.leave_time);

        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self, Error> {
        ensure_len(src, POSTCARD_HEADER_LEN)?;

        let mut src = &src[..POSTCARD_HEADER_LEN];
        let proto = src.get_u8();
        let node_id = src.get_u8();
        let tags = src.get_u8();

        Ok(Self {
            version: proto >> 4,
            next_protocol: proto & 0x0f,
            node_id,
            ingress: tags >> 4,
            egress: tags & 0x0f,
            seq: src.get_u32(),
            leave_time: src.get_u32(),
        })
    }
}

/// A decoded postcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Postcard {
    header: PostcardHeader,
    /// The captured leading bytes of the original packet.
    body: Bytes,
}

impl Postcard {
    pub fn new(header: PostcardHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Parses a postcard from its raw bytes (header followed by body).
    pub fn from_bytes(mut raw: Bytes) -> Result<Self, Error> {
        let header = PostcardHeader::decode(&raw)?;
        raw.advance(POSTCARD_HEADER_LEN);

        Ok(Self { header, body: raw })
    }

    #[inline]
    pub fn header(&self) -> &PostcardHeader {
        &self.header
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Total size of the postcard in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        POSTCARD_HEADER_LEN + self.body.len()
    }

    pub fn into_parts(self) -> (PostcardHeader, Bytes) {
        (self.header, self.body)
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Length,
    Payload(usize),
}

/// Length-delimited postcard framing.
#[derive(Debug, Default)]
pub struct Codec {
    /// The current state of the decoder.
    state: State,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Postcard;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Length => {
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let len = src.get_u16() as usize;
                    if len < POSTCARD_HEADER_LEN {
                        return Err(Error::Truncated { need: POSTCARD_HEADER_LEN, have: len });
                    }

                    self.state = State::Payload(len);
                }
                State::Payload(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }

                    let raw = src.split_to(len).freeze();
                    self.state = State::Length;

                    tracing::trace!(len, "decoded postcard frame");
                    return Postcard::from_bytes(raw).map(Some);
                }
            }
        }
    }
}

impl Encoder<Bytes> for Codec {
    type Error = Error;

    /// Frames raw postcard bytes, as produced by the postcard ring.
    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        ensure_len(&item, POSTCARD_HEADER_LEN)?;
        let len = u16::try_from(item.len()).map_err(|_| Error::OutOfBounds {
            offset: 0,
            len: item.len(),
            bound: u16::MAX as usize,
        })?;

        dst.reserve(2 + item.len());
        dst.put_u16(len);
        dst.put(item);

        Ok(())
    }
}

impl Encoder<Postcard> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Postcard, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut raw = BytesMut::zeroed(POSTCARD_HEADER_LEN);
        item.header.encode(&mut raw)?;
        raw.extend_from_slice(&item.body);

        Encoder::<Bytes>::encode(self, raw.freeze(), dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> PostcardHeader {
        PostcardHeader {
            version: POSTCARD_VERSION,
            next_protocol: 1,
            node_id: 42,
            ingress: 3,
            egress: 9,
            seq: 0xdead_beef,
            leave_time: 1_000_000,
        }
    }

    #[test]
    fn header_layout() {
        let mut buf = [0u8; POSTCARD_HEADER_LEN];
        header().encode(&mut buf).unwrap();

        assert_eq!(buf[0], 0x01);
        assert_eq!(buf[1], 42);
        assert_eq!(buf[2], 0x39);
        assert_eq!(&buf[3..7], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&buf[7..11], &1_000_000u32.to_be_bytes());
        assert_eq!(PostcardHeader::decode(&buf).unwrap(), header());
    }

    #[test]
    fn codec_frames_partial_input() {
        let mut codec = Codec::new();
        let mut wire = BytesMut::new();

        let first = Postcard::new(header(), Bytes::from_static(b"leading packet bytes"));
        let second = Postcard::new(PostcardHeader { seq: 1, ..header() }, Bytes::new());
        codec.encode(first.clone(), &mut wire).unwrap();
        codec.encode(second.clone(), &mut wire).unwrap();

        // Feed the stream in two uneven halves.
        let rest = wire.split_off(7);
        assert!(codec.decode(&mut wire).unwrap().is_none());
        assert_eq!(format!("{codec:?}"), "Codec { state: Payload(31) }");
        wire.extend_from_slice(&rest);

        assert_eq!(codec.decode(&mut wire).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut wire).unwrap(), Some(second));
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn codec_rejects_short_frames() {
        let mut codec = Codec::new();
        let mut wire = BytesMut::from(&[0x00, 0x04, 1, 2, 3, 4][..]);
        assert!(codec.decode(&mut wire).is_err());

        let mut out = BytesMut::new();
        assert!(codec.encode(Bytes::from_static(b"short"), &mut out).is_err());
    }
}
