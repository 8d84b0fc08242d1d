//! FCP: IEEE 1394 asynchronous packet and AV/C frame encode/decode (transport-agnostic).
//!
//! The crate covers the fixed fields of asynchronous request packets
//! ([`packet`]), the quadlet-based FCP frame carried in their payload
//! ([`frame`]), and the AV/C field packing of the first frame quadlet
//! ([`avc`]). Nothing here performs I/O.
//!
//! ```
//! use fcp::{avc, build_write, decode_response, FcpFrame, Speed, FCP_COMMAND_ADDR};
//!
//! let frame = FcpFrame::command(
//!     avc::AvcCtype::Control,
//!     avc::TAPE_SUBUNIT_0,
//!     avc::vcr::PLAY,
//!     avc::vcr::PLAY_FORWARD,
//! );
//! let packet = build_write(Speed::S400, FCP_COMMAND_ADDR, frame.words());
//! assert_eq!(decode_response(&packet).unwrap(), frame);
//! ```

pub mod avc;
pub mod frame;
pub mod packet;

use thiserror::Error;

pub use frame::FcpFrame;
pub use packet::{
    build_read_block, build_read_quadlet, build_write, build_write_block, build_write_quadlet,
    decode_response, NodeId, Packet, Speed, Tcode,
};

/// Offset of the FCP command register in the CSR space of every node.
pub const FCP_COMMAND_ADDR: u64 = 0xffff_f000_0b00;
/// Offset of the FCP response register in the CSR space of every node.
pub const FCP_RESPONSE_ADDR: u64 = 0xffff_f000_0d00;
/// Size of each FCP register in bytes.
pub const FCP_REGISTER_SIZE: u64 = 0x200;

/// Size of a quadlet in bytes.
pub const QUADLET_SIZE: usize = 4;

/// Errors that can occur when decoding asynchronous packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unsupported transaction code: {0:#03x}")]
    UnsupportedTcode(u8),
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
}
