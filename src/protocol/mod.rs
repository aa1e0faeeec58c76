// MySQL wire primitives
// Just enough of the protocol to read reply values and renumber packets:
// every packet is a 4-byte header (3-byte little-endian payload length and
// a 1-byte sequence id) followed by the payload.

pub mod packets;

pub use packets::{
    EofPacket, ErrorPacket, FieldPacket, OkPacket, ResultSetHeader, RowDataPacket,
};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the packet header in bytes
pub const HEADER_SIZE: usize = 4;

/// Largest payload a single packet can carry
pub const MAX_PAYLOAD: usize = 0x00ff_ffff;

/// Errors raised while decoding packets
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: needed {needed} more byte(s)")]
    Truncated { needed: usize },
    #[error("header declares {declared} payload bytes but {actual} are present")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unexpected packet marker 0x{0:02x}")]
    UnexpectedMarker(u8),
}

/// One raw protocol packet
///
/// The payload is reference counted, so renumbering a packet never copies
/// or touches the bytes another callback may be reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: [u8; HEADER_SIZE],
    payload: Bytes,
}

impl Packet {
    /// Build a packet around a payload with the given sequence id
    pub fn new(sequence: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let len = payload.len().min(MAX_PAYLOAD) as u32;
        let le = len.to_le_bytes();
        Self {
            header: [le[0], le[1], le[2], sequence],
            payload,
        }
    }

    /// Parse a packet from its raw bytes, header included
    pub fn from_bytes(raw: &[u8]) -> Result<Self, PacketError> {
        if raw.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                needed: HEADER_SIZE - raw.len(),
            });
        }
        let declared = u32::from_le_bytes([raw[0], raw[1], raw[2], 0]) as usize;
        let actual = raw.len() - HEADER_SIZE;
        if declared != actual {
            return Err(PacketError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            header: [raw[0], raw[1], raw[2], raw[3]],
            payload: Bytes::copy_from_slice(&raw[HEADER_SIZE..]),
        })
    }

    /// The sequence id carried in the 4th header byte
    pub fn sequence(&self) -> u8 {
        self.header[3]
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// A copy of this packet carrying a different sequence id
    pub fn with_sequence(&self, sequence: u8) -> Packet {
        let mut header = self.header;
        header[3] = sequence;
        Packet {
            header,
            payload: self.payload.clone(),
        }
    }

    /// First payload byte, used to tell OK/ERR/EOF apart
    pub fn marker(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Append header and payload to an output buffer
    pub fn write_to(&self, buffer: &mut BytesMut) {
        buffer.reserve(HEADER_SIZE + self.payload.len());
        buffer.put_slice(&self.header);
        buffer.put_slice(&self.payload);
    }

    /// Total encoded size, header included
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Hands out client-facing sequence ids for one statement's response
///
/// The command packet from the client carries id 0, so the first response
/// packet is 1. Ids wrap at 256 as they do on the wire.
#[derive(Debug, Default, Clone)]
pub struct Sequence {
    last: u8,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the next id
    pub fn next_id(&mut self) -> u8 {
        self.last = self.last.wrapping_add(1);
        self.last
    }

    /// Renumber a packet with the next id
    pub fn stamp(&mut self, packet: &Packet) -> Packet {
        packet.with_sequence(self.next_id())
    }
}

/// Cursor over a payload for decoding
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        if self.buf.len() < n {
            return Err(PacketError::Truncated {
                needed: n - self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn peek(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub(crate) fn u16(&mut self) -> Result<u16, PacketError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, PacketError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], PacketError> {
        self.take(n)
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Length-encoded integer
    pub(crate) fn lenenc_int(&mut self) -> Result<u64, PacketError> {
        let first = self.u8()?;
        let value = match first {
            0xfc => {
                let b = self.take(2)?;
                u64::from(u16::from_le_bytes([b[0], b[1]]))
            }
            0xfd => {
                let b = self.take(3)?;
                u64::from(u32::from_le_bytes([b[0], b[1], b[2], 0]))
            }
            0xfe => {
                let b = self.take(8)?;
                u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
            }
            n => u64::from(n),
        };
        Ok(value)
    }

    /// Length-encoded byte string
    pub(crate) fn lenenc_bytes(&mut self) -> Result<&'a [u8], PacketError> {
        let len = self.lenenc_int()? as usize;
        self.take(len)
    }
}

/// Append a length-encoded integer
pub(crate) fn put_lenenc_int(buf: &mut BytesMut, value: u64) {
    match value {
        0..=250 => buf.put_u8(value as u8),
        251..=0xffff => {
            buf.put_u8(0xfc);
            buf.put_u16_le(value as u16);
        }
        0x1_0000..=0xff_ffff => {
            buf.put_u8(0xfd);
            buf.put_uint_le(value, 3);
        }
        _ => {
            buf.put_u8(0xfe);
            buf.put_u64_le(value);
        }
    }
}

/// Append a length-encoded byte string
pub(crate) fn put_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    put_lenenc_int(buf, value.len() as u64);
    buf.put_slice(value);
}
