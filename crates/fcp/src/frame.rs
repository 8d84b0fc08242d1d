//! Quadlet-based FCP frame.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::avc::{
    self, AvcAddr, AvcCtype, ResponseClass, ADDRESS_SHIFT, CODE_MASK, CODE_SHIFT,
    OPCODE_CLASS_MASK, OPCODE_SHIFT,
};
use crate::QUADLET_SIZE;

/// An FCP frame: one AV/C command or response as a sequence of host-order quadlets.
///
/// A frame always holds at least one quadlet. Frames decoded from the wire are
/// zero-padded to whole quadlets, so the AV/C header fields are always defined.
#[derive(Clone, PartialEq, Eq)]
pub struct FcpFrame {
    words: Vec<u32>,
}

impl FcpFrame {
    /// Build a frame from host-order quadlets.
    ///
    /// An empty sequence is replaced with a single zero quadlet.
    pub fn from_words(words: impl Into<Vec<u32>>) -> Self {
        let mut words = words.into();
        if words.is_empty() {
            words.push(0);
        }
        Self { words }
    }

    /// Decode a frame from big-endian wire bytes.
    pub fn from_wire(bytes: &[u8]) -> Self {
        let words: Vec<u32> = bytes
            .chunks(QUADLET_SIZE)
            .map(|chunk| {
                let mut quadlet = [0u8; QUADLET_SIZE];
                quadlet[..chunk.len()].copy_from_slice(chunk);
                u32::from_be_bytes(quadlet)
            })
            .collect();
        Self::from_words(words)
    }

    /// Build a single-quadlet AV/C command frame.
    pub fn command(ctype: AvcCtype, addr: AvcAddr, opcode: u8, operand0: u8) -> Self {
        Self {
            words: vec![avc::pack_first_quadlet(
                ctype.to_raw(),
                addr,
                opcode,
                operand0,
            )],
        }
    }

    /// Append a quadlet of further operands.
    pub fn with_quadlet(mut self, quadlet: u32) -> Self {
        self.words.push(quadlet);
        self
    }

    /// Encode the frame into big-endian wire bytes.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.words.len() * QUADLET_SIZE);
        for &word in &self.words {
            buf.put_u32(word);
        }
        buf.freeze()
    }

    /// All quadlets of the frame.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Number of quadlets.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// First quadlet, holding the AV/C header fields.
    pub fn first(&self) -> u32 {
        self.words[0]
    }

    /// Quadlet at `index`, if present.
    pub fn quadlet(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied()
    }

    /// Raw ctype (command) or response (response) nibble.
    pub fn code(&self) -> u8 {
        ((self.first() >> CODE_SHIFT) & CODE_MASK) as u8
    }

    /// Command type of a command frame.
    pub fn ctype(&self) -> AvcCtype {
        AvcCtype::from_raw(self.code())
    }

    /// Response class of a response frame.
    pub fn response_class(&self) -> ResponseClass {
        ResponseClass::from_raw(self.code())
    }

    /// Raw address byte.
    pub fn address_byte(&self) -> u8 {
        (self.first() >> ADDRESS_SHIFT) as u8
    }

    /// Addressed unit or subunit.
    pub fn address(&self) -> AvcAddr {
        AvcAddr::from_raw(self.address_byte())
    }

    /// Opcode byte.
    pub fn opcode(&self) -> u8 {
        (self.first() >> OPCODE_SHIFT) as u8
    }

    /// Opcode-class bits: address and opcode, without ctype and operands.
    pub fn opcode_class(&self) -> u32 {
        self.first() & OPCODE_CLASS_MASK
    }

    /// Operand byte at `index`; operand 0 is the low byte of the first quadlet.
    pub fn operand(&self, index: usize) -> Option<u8> {
        let pos = 3 + index;
        self.words
            .get(pos / QUADLET_SIZE)
            .map(|word| word.to_be_bytes()[pos % QUADLET_SIZE])
    }
}

impl fmt::Debug for FcpFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FcpFrame").field(&format_args!("{self}")).finish()
    }
}

impl fmt::Display for FcpFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, word) in self.words.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{word:08x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::{vcr, AvcRespCode, AvcSubunitType, TAPE_SUBUNIT_0};

    #[test]
    fn command_fields() {
        let frame = FcpFrame::command(
            AvcCtype::Status,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        assert_eq!(frame.first(), 0x0120_d07f);
        assert_eq!(frame.ctype(), AvcCtype::Status);
        assert_eq!(frame.address().subunit_type(), AvcSubunitType::Tape);
        assert_eq!(frame.opcode(), vcr::TRANSPORT_STATE);
        assert_eq!(frame.operand(0), Some(vcr::TRANSPORT_STATE_INQUIRY));
        assert_eq!(frame.operand(1), None);
        assert_eq!(frame.opcode_class(), 0x0020_d000);
    }

    #[test]
    fn operands_span_quadlets() {
        let frame = FcpFrame::from_words(vec![0x0c20_5171, 0x1122_3344]);
        assert_eq!(frame.operand(0), Some(0x71));
        assert_eq!(frame.operand(1), Some(0x11));
        assert_eq!(frame.operand(4), Some(0x44));
        assert_eq!(frame.operand(5), None);
        assert_eq!(
            frame.response_class(),
            ResponseClass::Stable(AvcRespCode::ImplementedStable)
        );
    }

    #[test]
    fn wire_bytes_are_big_endian() {
        let frame = FcpFrame::from_words(vec![0x0120_d07f, 0xffff_ffff]);
        let wire = frame.to_wire();
        assert_eq!(&wire[..], &[0x01, 0x20, 0xd0, 0x7f, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(FcpFrame::from_wire(&wire), frame);
    }

    #[test]
    fn short_wire_is_padded() {
        let frame = FcpFrame::from_wire(&[0x09, 0x20, 0xc3]);
        assert_eq!(frame.words(), &[0x0920_c300]);
        let empty = FcpFrame::from_wire(&[]);
        assert_eq!(empty.words(), &[0]);
        assert_eq!(empty.response_class(), ResponseClass::NotReady);
    }
}
