//! IEEE 1394 asynchronous request packets.
//!
//! Payload quadlets are kept in big-endian wire order inside the packet, so a
//! packet built on any host serialises to the same bytes. Conversion between
//! host order and wire order happens only in the builders and in
//! [`decode_response`].

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::frame::FcpFrame;
use crate::{CodecError, QUADLET_SIZE};

/// Mask of the 48-bit destination offset.
pub const OFFSET_MASK: u64 = 0xffff_ffff_ffff;
/// Retry code placed in outgoing headers (`retry_X`).
const RETRY_X: u32 = 0x1;
const TLABEL_MASK: u8 = 0x3f;

/// Transaction codes of asynchronous packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tcode {
    WriteQuadletRequest,
    WriteBlockRequest,
    WriteResponse,
    ReadQuadletRequest,
    ReadBlockRequest,
    ReadQuadletResponse,
    ReadBlockResponse,
    CycleStart,
    LockRequest,
    StreamData,
    LockResponse,
    Reserved(u8),
}

impl Tcode {
    /// Convert from the raw 4-bit tcode field.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x0f {
            0x0 => Tcode::WriteQuadletRequest,
            0x1 => Tcode::WriteBlockRequest,
            0x2 => Tcode::WriteResponse,
            0x4 => Tcode::ReadQuadletRequest,
            0x5 => Tcode::ReadBlockRequest,
            0x6 => Tcode::ReadQuadletResponse,
            0x7 => Tcode::ReadBlockResponse,
            0x8 => Tcode::CycleStart,
            0x9 => Tcode::LockRequest,
            0xa => Tcode::StreamData,
            0xb => Tcode::LockResponse,
            other => Tcode::Reserved(other),
        }
    }

    /// Convert to the raw 4-bit tcode field.
    pub const fn to_raw(self) -> u8 {
        match self {
            Tcode::WriteQuadletRequest => 0x0,
            Tcode::WriteBlockRequest => 0x1,
            Tcode::WriteResponse => 0x2,
            Tcode::ReadQuadletRequest => 0x4,
            Tcode::ReadBlockRequest => 0x5,
            Tcode::ReadQuadletResponse => 0x6,
            Tcode::ReadBlockResponse => 0x7,
            Tcode::CycleStart => 0x8,
            Tcode::LockRequest => 0x9,
            Tcode::StreamData => 0xa,
            Tcode::LockResponse => 0xb,
            Tcode::Reserved(raw) => raw & 0x0f,
        }
    }

    /// Whether the header of this tcode carries a data length and a block payload.
    pub const fn has_block_payload(self) -> bool {
        matches!(
            self,
            Tcode::WriteBlockRequest | Tcode::ReadBlockResponse | Tcode::LockRequest | Tcode::LockResponse
        )
    }
}

/// Transmission speed of an asynchronous packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Speed {
    S100,
    S200,
    #[default]
    S400,
    S800,
    S1600,
    S3200,
}

impl Speed {
    /// Maximum asynchronous payload in bytes at this speed.
    pub const fn max_payload(self) -> usize {
        match self {
            Speed::S100 => 512,
            Speed::S200 => 1024,
            Speed::S400 => 2048,
            Speed::S800 => 4096,
            Speed::S1600 => 8192,
            Speed::S3200 => 16384,
        }
    }
}

/// 16-bit node identifier: 10-bit bus id and 6-bit physical id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u16);

impl NodeId {
    /// Bus id addressing the local bus.
    pub const LOCAL_BUS: u16 = 0x3ff;
    /// Physical id reserved for broadcast.
    pub const BROADCAST_PHY: u8 = 0x3f;

    /// Build a node id from its bus and physical ids.
    pub const fn new(bus: u16, phy: u8) -> Self {
        Self(((bus & 0x3ff) << 6) | (phy as u16 & 0x3f))
    }

    /// Node on the local bus.
    pub const fn local(phy: u8) -> Self {
        Self::new(Self::LOCAL_BUS, phy)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn bus(self) -> u16 {
        self.0 >> 6
    }

    pub const fn phy(self) -> u8 {
        (self.0 & 0x3f) as u8
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:#06x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Asynchronous request packet, independent of the source/destination addressing
/// that the bus layer fills in at transmission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    tcode: Tcode,
    speed: Speed,
    offset: u64,
    data_length: usize,
    payload: Bytes,
}

impl Packet {
    /// Build a packet from raw fields. `payload` must already be in wire order.
    pub fn new(tcode: Tcode, speed: Speed, offset: u64, payload: Bytes) -> Self {
        debug_assert!(offset <= OFFSET_MASK, "offset exceeds 48 bits");
        Self {
            tcode,
            speed,
            offset: offset & OFFSET_MASK,
            data_length: payload.len(),
            payload,
        }
    }

    pub fn tcode(&self) -> Tcode {
        self.tcode
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// 48-bit destination offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Value of the data length field; the requested length for block reads.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Payload bytes in wire order.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Host-order value of the quadlet carried in the header of a quadlet write.
    pub fn quadlet(&self) -> Option<u32> {
        if self.tcode != Tcode::WriteQuadletRequest || self.payload.len() < QUADLET_SIZE {
            return None;
        }
        let mut cursor = &self.payload[..];
        Some(cursor.get_u32())
    }

    /// Render the header quadlets for transmission.
    ///
    /// Quadlet requests carry three header quadlets plus, for writes, the data
    /// quadlet; block requests carry the data length in the fourth quadlet.
    pub fn header(&self, destination: NodeId, source: NodeId, tlabel: u8) -> Vec<u32> {
        let mut header = Vec::with_capacity(4);
        header.push(
            ((destination.raw() as u32) << 16)
                | (((tlabel & TLABEL_MASK) as u32) << 10)
                | (RETRY_X << 8)
                | ((self.tcode.to_raw() as u32) << 4),
        );
        header.push(((source.raw() as u32) << 16) | ((self.offset >> 32) as u32 & 0xffff));
        header.push(self.offset as u32);
        match self.tcode {
            Tcode::WriteQuadletRequest => header.push(self.quadlet().unwrap_or(0)),
            tcode if tcode.has_block_payload() || tcode == Tcode::ReadBlockRequest => {
                header.push((self.data_length as u32 & 0xffff) << 16)
            }
            _ => {}
        }
        header
    }

    /// Render header and payload as wire bytes.
    pub fn to_wire(&self, destination: NodeId, source: NodeId, tlabel: u8) -> Bytes {
        let header = self.header(destination, source, tlabel);
        let payload_len = if self.tcode.has_block_payload() {
            self.payload.len()
        } else {
            0
        };
        let mut buf = BytesMut::with_capacity(header.len() * QUADLET_SIZE + payload_len);
        for quadlet in header {
            buf.put_u32(quadlet);
        }
        if payload_len > 0 {
            buf.extend_from_slice(&self.payload);
        }
        buf.freeze()
    }

    /// Parse wire bytes of an asynchronous request back into addressing and packet.
    pub fn parse(wire: &[u8], speed: Speed) -> Result<(NodeId, NodeId, Packet), CodecError> {
        if wire.len() < 3 * QUADLET_SIZE {
            return Err(CodecError::InvalidPacket("header too short"));
        }
        let mut cursor = wire;
        let q0 = cursor.get_u32();
        let q1 = cursor.get_u32();
        let q2 = cursor.get_u32();
        let destination = NodeId::from_raw((q0 >> 16) as u16);
        let source = NodeId::from_raw((q1 >> 16) as u16);
        let tcode = Tcode::from_raw(((q0 >> 4) & 0x0f) as u8);
        let offset = (((q1 & 0xffff) as u64) << 32) | q2 as u64;

        let packet = match tcode {
            Tcode::WriteQuadletRequest => {
                if cursor.remaining() < QUADLET_SIZE {
                    return Err(CodecError::InvalidPacket("missing quadlet data"));
                }
                build_write_quadlet(speed, offset, cursor.get_u32())
            }
            Tcode::ReadQuadletRequest => build_read_quadlet(speed, offset),
            Tcode::ReadBlockRequest | Tcode::WriteBlockRequest => {
                if cursor.remaining() < QUADLET_SIZE {
                    return Err(CodecError::InvalidPacket("missing data length"));
                }
                let length = (cursor.get_u32() >> 16) as usize;
                if tcode == Tcode::ReadBlockRequest {
                    build_read_block(speed, offset, length)
                } else {
                    if cursor.remaining() < length {
                        return Err(CodecError::InvalidPacket("block payload truncated"));
                    }
                    Packet::new(tcode, speed, offset, Bytes::copy_from_slice(&cursor[..length]))
                }
            }
            other => return Err(CodecError::UnsupportedTcode(other.to_raw())),
        };
        Ok((destination, source, packet))
    }
}

/// Build a quadlet write request carrying `data` in its header.
pub fn build_write_quadlet(speed: Speed, offset: u64, data: u32) -> Packet {
    Packet::new(
        Tcode::WriteQuadletRequest,
        speed,
        offset,
        Bytes::copy_from_slice(&data.to_be_bytes()),
    )
}

/// Build a block write request; every quadlet is serialised big-endian.
pub fn build_write_block(speed: Speed, offset: u64, words: &[u32]) -> Packet {
    let mut buf = BytesMut::with_capacity(words.len() * QUADLET_SIZE);
    for &word in words {
        buf.put_u32(word);
    }
    Packet::new(Tcode::WriteBlockRequest, speed, offset, buf.freeze())
}

/// Build a write request for an FCP frame.
///
/// AV/C requires a quadlet write for a frame of exactly one quadlet and a
/// block write otherwise.
pub fn build_write(speed: Speed, offset: u64, words: &[u32]) -> Packet {
    debug_assert!(!words.is_empty(), "FCP frames hold at least one quadlet");
    match words {
        [single] => build_write_quadlet(speed, offset, *single),
        _ => build_write_block(speed, offset, words),
    }
}

/// Build a quadlet read request.
pub fn build_read_quadlet(speed: Speed, offset: u64) -> Packet {
    Packet {
        tcode: Tcode::ReadQuadletRequest,
        speed,
        offset: offset & OFFSET_MASK,
        data_length: QUADLET_SIZE,
        payload: Bytes::new(),
    }
}

/// Build a block read request for `length` bytes.
pub fn build_read_block(speed: Speed, offset: u64, length: usize) -> Packet {
    debug_assert!(length <= speed.max_payload(), "read length exceeds speed limit");
    Packet {
        tcode: Tcode::ReadBlockRequest,
        speed,
        offset: offset & OFFSET_MASK,
        data_length: length,
        payload: Bytes::new(),
    }
}

/// Decode the FCP frame carried by a write request.
///
/// A quadlet write keeps its frame in the header data slot, a block write in
/// the block payload; both are converted from big-endian wire order.
pub fn decode_response(packet: &Packet) -> Result<FcpFrame, CodecError> {
    match packet.tcode() {
        Tcode::WriteQuadletRequest => Ok(FcpFrame::from_words(vec![packet
            .quadlet()
            .unwrap_or(0)])),
        Tcode::WriteBlockRequest => Ok(FcpFrame::from_wire(packet.payload())),
        other => Err(CodecError::UnsupportedTcode(other.to_raw())),
    }
}
