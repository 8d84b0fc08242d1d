//! AV/C fields packed into the first quadlet of an FCP frame.
//!
//! ```text
//!  31  28 27  24 23    19 18  16 15       8 7        0
//! +------+------+--------+------+----------+----------+
//! | CTS  |ctype | type   |  id  |  opcode  | operand0 |
//! +------+------+--------+------+----------+----------+
//! ```
//!
//! The CTS nibble is always zero for AV/C. The ctype nibble carries the
//! command type in a command frame and the response code in a response frame.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shift of the ctype/response nibble in the first frame quadlet.
pub const CODE_SHIFT: u32 = 24;
/// Mask of the ctype/response nibble (after shifting).
pub const CODE_MASK: u32 = 0x0f;
/// Shift of the address byte (subunit type and id).
pub const ADDRESS_SHIFT: u32 = 16;
/// Shift of the opcode byte.
pub const OPCODE_SHIFT: u32 = 8;
/// Bits of the first quadlet identifying the opcode class: address and opcode, no operands.
pub const OPCODE_CLASS_MASK: u32 = 0x00ff_ff00;

/// Opcodes of unit commands.
pub mod unit {
    /// UNIT INFO.
    pub const UNIT_INFO: u8 = 0x30;
    /// SUBUNIT INFO.
    pub const SUBUNIT_INFO: u8 = 0x31;
    /// Operand padding used by status queries.
    pub const PADDING: u8 = 0xff;
    /// Operand 0 of a UNIT INFO response.
    pub const UNIT_INFO_OPERAND: u8 = 0x07;
    /// Extension code operand of SUBUNIT INFO.
    pub const SUBUNIT_INFO_EXTENSION: u8 = 0x07;
    /// Number of SUBUNIT INFO pages addressing the 32 subunits of a unit.
    pub const SUBUNIT_INFO_PAGES: usize = 8;
    /// Table entry for an unused slot.
    pub const EMPTY_ENTRY: u8 = 0xff;
}

/// Opcodes and operands of the tape recorder (VCR) subunit.
pub mod vcr {
    pub const LOAD_MEDIUM: u8 = 0xc1;
    pub const RECORD: u8 = 0xc2;
    pub const PLAY: u8 = 0xc3;
    pub const WIND: u8 = 0xc4;
    pub const TRANSPORT_STATE: u8 = 0xd0;
    pub const TIME_CODE: u8 = 0x51;
    pub const FORWARD: u8 = 0x55;
    pub const BACKWARD: u8 = 0x56;

    pub const LOAD_MEDIUM_EJECT: u8 = 0x60;

    pub const RECORD_RECORD: u8 = 0x75;
    pub const RECORD_PAUSE: u8 = 0x7d;

    pub const PLAY_NEXT_FRAME: u8 = 0x30;
    pub const PLAY_SLOWEST_FORWARD: u8 = 0x31;
    pub const PLAY_FAST_FORWARD_1: u8 = 0x38;
    pub const PLAY_FASTEST_FORWARD: u8 = 0x3f;
    pub const PLAY_PREVIOUS_FRAME: u8 = 0x40;
    pub const PLAY_SLOWEST_REVERSE: u8 = 0x41;
    pub const PLAY_FAST_REVERSE_1: u8 = 0x48;
    pub const PLAY_FASTEST_REVERSE: u8 = 0x4f;
    pub const PLAY_REVERSE: u8 = 0x65;
    pub const PLAY_FORWARD: u8 = 0x75;
    pub const PLAY_FORWARD_PAUSE: u8 = 0x7d;

    pub const WIND_HIGH_SPEED_REWIND: u8 = 0x45;
    pub const WIND_STOP: u8 = 0x60;
    pub const WIND_REWIND: u8 = 0x65;
    pub const WIND_FAST_FORWARD: u8 = 0x75;

    pub const TRANSPORT_STATE_INQUIRY: u8 = 0x7f;

    pub const TIME_CODE_CONTROL: u8 = 0x20;
    pub const TIME_CODE_STATUS: u8 = 0x71;

    /// Measurement unit of FORWARD/BACKWARD counting index marks.
    pub const MEASUREMENT_INDEX: u8 = 0x61;

    /// Opcodes a TRANSPORT STATE status response may carry in place of the command opcode.
    pub const TRANSPORT_MODES: [u8; 4] = [LOAD_MEDIUM, RECORD, PLAY, WIND];
}

/// The type of command in an AV/C transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AvcCtype {
    /// Perform an operation on the addressed target.
    Control,
    /// Check current status of the addressed target.
    Status,
    /// Check whether the target supports a particular control command including operands.
    SpecificInquiry,
    /// Schedule notification of a change in the target.
    Notify,
    /// Check whether the target supports a particular control command regardless of operands.
    GeneralInquiry,
    Reserved(u8),
}

impl AvcCtype {
    const CONTROL: u8 = 0x00;
    const STATUS: u8 = 0x01;
    const SPECIFIC_INQUIRY: u8 = 0x02;
    const NOTIFY: u8 = 0x03;
    const GENERAL_INQUIRY: u8 = 0x04;

    /// Convert from the raw ctype nibble.
    pub fn from_raw(raw: u8) -> Self {
        match raw & CODE_MASK as u8 {
            Self::CONTROL => AvcCtype::Control,
            Self::STATUS => AvcCtype::Status,
            Self::SPECIFIC_INQUIRY => AvcCtype::SpecificInquiry,
            Self::NOTIFY => AvcCtype::Notify,
            Self::GENERAL_INQUIRY => AvcCtype::GeneralInquiry,
            other => AvcCtype::Reserved(other),
        }
    }

    /// Convert to the raw ctype nibble.
    pub const fn to_raw(self) -> u8 {
        match self {
            AvcCtype::Control => Self::CONTROL,
            AvcCtype::Status => Self::STATUS,
            AvcCtype::SpecificInquiry => Self::SPECIFIC_INQUIRY,
            AvcCtype::Notify => Self::NOTIFY,
            AvcCtype::GeneralInquiry => Self::GENERAL_INQUIRY,
            AvcCtype::Reserved(raw) => raw,
        }
    }
}

/// The code of a final AV/C response.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AvcRespCode {
    NotImplemented,
    Accepted,
    Rejected,
    InTransition,
    /// `IMPLEMENTED` for inquiries, `STABLE` for status and notify commands.
    ImplementedStable,
    Changed,
    Interim,
    Reserved(u8),
}

impl AvcRespCode {
    const NOT_IMPLEMENTED: u8 = 0x08;
    const ACCEPTED: u8 = 0x09;
    const REJECTED: u8 = 0x0a;
    const IN_TRANSITION: u8 = 0x0b;
    const IMPLEMENTED_STABLE: u8 = 0x0c;
    const CHANGED: u8 = 0x0d;
    const INTERIM: u8 = 0x0f;

    /// Convert from the raw response nibble.
    pub fn from_raw(raw: u8) -> Self {
        match raw & CODE_MASK as u8 {
            Self::NOT_IMPLEMENTED => AvcRespCode::NotImplemented,
            Self::ACCEPTED => AvcRespCode::Accepted,
            Self::REJECTED => AvcRespCode::Rejected,
            Self::IN_TRANSITION => AvcRespCode::InTransition,
            Self::IMPLEMENTED_STABLE => AvcRespCode::ImplementedStable,
            Self::CHANGED => AvcRespCode::Changed,
            Self::INTERIM => AvcRespCode::Interim,
            other => AvcRespCode::Reserved(other),
        }
    }

    /// Convert to the raw response nibble.
    pub const fn to_raw(self) -> u8 {
        match self {
            AvcRespCode::NotImplemented => Self::NOT_IMPLEMENTED,
            AvcRespCode::Accepted => Self::ACCEPTED,
            AvcRespCode::Rejected => Self::REJECTED,
            AvcRespCode::InTransition => Self::IN_TRANSITION,
            AvcRespCode::ImplementedStable => Self::IMPLEMENTED_STABLE,
            AvcRespCode::Changed => Self::CHANGED,
            AvcRespCode::Interim => Self::INTERIM,
            AvcRespCode::Reserved(raw) => raw,
        }
    }
}

/// Classification of the response nibble used by response correlation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseClass {
    /// Zero code: the target has not produced an answer yet.
    NotReady,
    /// Provisional answer; only meaningful for notify commands.
    Interim,
    /// Terminal answer.
    Stable(AvcRespCode),
}

impl ResponseClass {
    /// Classify the raw response nibble.
    pub fn from_raw(raw: u8) -> Self {
        match AvcRespCode::from_raw(raw) {
            AvcRespCode::Reserved(0) => ResponseClass::NotReady,
            AvcRespCode::Interim => ResponseClass::Interim,
            code => ResponseClass::Stable(code),
        }
    }
}

/// The type of subunit in an AV/C address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AvcSubunitType {
    Monitor,
    Audio,
    Printer,
    Disc,
    Tape,
    Tuner,
    Ca,
    Camera,
    Panel,
    BulletinBoard,
    CameraStorage,
    Music,
    VendorUnique,
    Extended,
    Unit,
    Reserved(u8),
}

impl AvcSubunitType {
    const MONITOR: u8 = 0x00;
    const AUDIO: u8 = 0x01;
    const PRINTER: u8 = 0x02;
    const DISC: u8 = 0x03;
    const TAPE: u8 = 0x04;
    const TUNER: u8 = 0x05;
    const CA: u8 = 0x06;
    const CAMERA: u8 = 0x07;
    const PANEL: u8 = 0x09;
    const BULLETIN_BOARD: u8 = 0x0a;
    const CAMERA_STORAGE: u8 = 0x0b;
    const MUSIC: u8 = 0x0c;
    const VENDOR_UNIQUE: u8 = 0x1c;
    const EXTENDED: u8 = 0x1e;
    const UNIT: u8 = 0x1f;

    /// Convert from the 5-bit subunit type field.
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x1f {
            Self::MONITOR => AvcSubunitType::Monitor,
            Self::AUDIO => AvcSubunitType::Audio,
            Self::PRINTER => AvcSubunitType::Printer,
            Self::DISC => AvcSubunitType::Disc,
            Self::TAPE => AvcSubunitType::Tape,
            Self::TUNER => AvcSubunitType::Tuner,
            Self::CA => AvcSubunitType::Ca,
            Self::CAMERA => AvcSubunitType::Camera,
            Self::PANEL => AvcSubunitType::Panel,
            Self::BULLETIN_BOARD => AvcSubunitType::BulletinBoard,
            Self::CAMERA_STORAGE => AvcSubunitType::CameraStorage,
            Self::MUSIC => AvcSubunitType::Music,
            Self::VENDOR_UNIQUE => AvcSubunitType::VendorUnique,
            Self::EXTENDED => AvcSubunitType::Extended,
            Self::UNIT => AvcSubunitType::Unit,
            other => AvcSubunitType::Reserved(other),
        }
    }

    /// Convert to the 5-bit subunit type field.
    pub const fn to_raw(self) -> u8 {
        match self {
            AvcSubunitType::Monitor => Self::MONITOR,
            AvcSubunitType::Audio => Self::AUDIO,
            AvcSubunitType::Printer => Self::PRINTER,
            AvcSubunitType::Disc => Self::DISC,
            AvcSubunitType::Tape => Self::TAPE,
            AvcSubunitType::Tuner => Self::TUNER,
            AvcSubunitType::Ca => Self::CA,
            AvcSubunitType::Camera => Self::CAMERA,
            AvcSubunitType::Panel => Self::PANEL,
            AvcSubunitType::BulletinBoard => Self::BULLETIN_BOARD,
            AvcSubunitType::CameraStorage => Self::CAMERA_STORAGE,
            AvcSubunitType::Music => Self::MUSIC,
            AvcSubunitType::VendorUnique => Self::VENDOR_UNIQUE,
            AvcSubunitType::Extended => Self::EXTENDED,
            AvcSubunitType::Unit => Self::UNIT,
            AvcSubunitType::Reserved(raw) => raw & 0x1f,
        }
    }
}

/// AV/C address: the unit itself or one of its subunits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AvcAddr {
    Unit,
    Subunit {
        subunit_type: AvcSubunitType,
        id: u8,
    },
}

/// The AV/C address of the first tape recorder subunit for convenience.
pub const TAPE_SUBUNIT_0: AvcAddr = AvcAddr::Subunit {
    subunit_type: AvcSubunitType::Tape,
    id: 0,
};

/// The AV/C address of the first tuner subunit for convenience.
pub const TUNER_SUBUNIT_0: AvcAddr = AvcAddr::Subunit {
    subunit_type: AvcSubunitType::Tuner,
    id: 0,
};

impl AvcAddr {
    /// Raw address byte of the unit (subunit type 0x1f, id "ignore").
    pub const UNIT_ADDR: u8 = 0xff;
    /// Subunit id meaning "ignore"; used by unit commands.
    pub const ID_IGNORE: u8 = 0x07;

    const TYPE_SHIFT: u8 = 3;
    const ID_MASK: u8 = 0x07;

    /// Build a subunit address, truncating the id to three bits.
    pub fn subunit(subunit_type: AvcSubunitType, id: u8) -> Self {
        AvcAddr::Subunit {
            subunit_type,
            id: id & Self::ID_MASK,
        }
    }

    /// Convert from the raw address byte.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            Self::UNIT_ADDR => AvcAddr::Unit,
            _ => AvcAddr::Subunit {
                subunit_type: AvcSubunitType::from_raw(raw >> Self::TYPE_SHIFT),
                id: raw & Self::ID_MASK,
            },
        }
    }

    /// Convert to the raw address byte.
    pub fn to_raw(self) -> u8 {
        match self {
            AvcAddr::Unit => Self::UNIT_ADDR,
            AvcAddr::Subunit { subunit_type, id } => {
                (subunit_type.to_raw() << Self::TYPE_SHIFT) | (id & Self::ID_MASK)
            }
        }
    }

    /// Subunit type of the address; the unit reports [`AvcSubunitType::Unit`].
    pub fn subunit_type(self) -> AvcSubunitType {
        match self {
            AvcAddr::Unit => AvcSubunitType::Unit,
            AvcAddr::Subunit { subunit_type, .. } => subunit_type,
        }
    }
}

/// Pack the first quadlet of an AV/C frame.
pub fn pack_first_quadlet(code: u8, addr: AvcAddr, opcode: u8, operand0: u8) -> u32 {
    (((code as u32) & CODE_MASK) << CODE_SHIFT)
        | ((addr.to_raw() as u32) << ADDRESS_SHIFT)
        | ((opcode as u32) << OPCODE_SHIFT)
        | operand0 as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_play_forward_layout() {
        let quadlet = pack_first_quadlet(
            AvcCtype::Control.to_raw(),
            TAPE_SUBUNIT_0,
            vcr::PLAY,
            vcr::PLAY_FORWARD,
        );
        assert_eq!(quadlet, 0x0020_c375);
    }

    #[test]
    fn unit_address_is_all_ones() {
        assert_eq!(AvcAddr::Unit.to_raw(), 0xff);
        assert_eq!(AvcAddr::from_raw(0xff), AvcAddr::Unit);
        assert_eq!(AvcAddr::Unit.subunit_type(), AvcSubunitType::Unit);
    }

    #[test]
    fn subunit_address_fields() {
        let addr = AvcAddr::from_raw(0x2d);
        assert_eq!(addr, AvcAddr::subunit(AvcSubunitType::Tuner, 5));
        assert_eq!(addr.to_raw(), 0x2d);
        assert_eq!(AvcAddr::subunit(AvcSubunitType::Tape, 9).to_raw(), 0x21);
    }

    #[test]
    fn response_classes() {
        assert_eq!(ResponseClass::from_raw(0x0), ResponseClass::NotReady);
        assert_eq!(ResponseClass::from_raw(0xf), ResponseClass::Interim);
        assert_eq!(
            ResponseClass::from_raw(0xc),
            ResponseClass::Stable(AvcRespCode::ImplementedStable)
        );
        assert_eq!(
            ResponseClass::from_raw(0x8),
            ResponseClass::Stable(AvcRespCode::NotImplemented)
        );
    }

    #[test]
    fn ctype_nibbles() {
        assert_eq!(AvcCtype::from_raw(0x03), AvcCtype::Notify);
        assert_eq!(AvcCtype::Status.to_raw(), 0x01);
        assert_eq!(AvcCtype::from_raw(0x07), AvcCtype::Reserved(0x07));
    }
}
