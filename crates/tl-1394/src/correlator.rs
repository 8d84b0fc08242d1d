//! Matching of FCP response frames against the outstanding command.
//!
//! Any node may write to the FCP response register, so a frame is only
//! accepted when its opcode class (subunit address and opcode) equals the
//! command's. Operands never take part in the comparison because responses
//! legitimately rewrite them.

use fcp::avc::{vcr, AvcCtype, AvcSubunitType, ResponseClass, OPCODE_CLASS_MASK, OPCODE_SHIFT};
use fcp::{decode_response, CodecError, FcpFrame, NodeId, Packet, Tcode};

/// Opcode-class key derived from the first quadlet of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationKey {
    class: u32,
    transport_status: bool,
}

impl CorrelationKey {
    /// Derive the key of `command`.
    ///
    /// A tape TRANSPORT STATE status or notify command is answered with the
    /// opcode of the current transport mode, so its key also accepts those
    /// opcodes at the same subunit address.
    pub fn for_command(command: &FcpFrame) -> Self {
        let transport_status = matches!(command.ctype(), AvcCtype::Status | AvcCtype::Notify)
            && command.opcode() == vcr::TRANSPORT_STATE
            && command.address().subunit_type() == AvcSubunitType::Tape;
        Self {
            class: command.opcode_class(),
            transport_status,
        }
    }

    /// The masked opcode-class bits.
    pub fn class(&self) -> u32 {
        self.class
    }

    pub fn matches(&self, response: &FcpFrame) -> bool {
        let class = response.opcode_class();
        if class == self.class {
            return true;
        }
        if !self.transport_status {
            return false;
        }
        let same_address = (class ^ self.class) & OPCODE_CLASS_MASK & !(0xff << OPCODE_SHIFT) == 0;
        same_address && vcr::TRANSPORT_MODES.contains(&response.opcode())
    }
}

/// A response frame accepted for the outstanding command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub source: NodeId,
    pub tcode: Tcode,
    pub frame: FcpFrame,
}

/// What to do with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Not for the outstanding command; answer with an address error.
    Stray,
    /// Not a write request; answer with a type error and keep waiting.
    UnsupportedTcode(u8),
    /// Interim response to a notify command; answer complete and keep waiting.
    Interim,
    /// Zero response code; answer complete and re-send the command.
    NotReady,
    /// Final response; answer complete.
    Resolved(ResponseFrame),
}

/// Correlator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Awaiting { key: CorrelationKey, notify: bool },
    Resolved,
}

/// State machine deciding the fate of every frame written to the response register.
#[derive(Debug, Clone)]
pub struct Correlator {
    state: State,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Start waiting for the response to `command`.
    pub fn arm(&mut self, command: &FcpFrame) {
        self.state = State::Awaiting {
            key: CorrelationKey::for_command(command),
            notify: command.ctype() == AvcCtype::Notify,
        };
    }

    /// Return to idle; every later frame is a stray.
    pub fn disarm(&mut self) {
        self.state = State::Idle;
    }

    /// Classify a write request that landed on the response register.
    pub fn offer(&mut self, source: NodeId, packet: &Packet) -> Disposition {
        let State::Awaiting { key, notify } = self.state else {
            return Disposition::Stray;
        };
        let frame = match decode_response(packet) {
            Ok(frame) => frame,
            Err(CodecError::UnsupportedTcode(tcode)) => return Disposition::UnsupportedTcode(tcode),
            Err(_) => return Disposition::Stray,
        };
        if !key.matches(&frame) {
            return Disposition::Stray;
        }
        match frame.response_class() {
            ResponseClass::Interim if notify => Disposition::Interim,
            ResponseClass::Interim => Disposition::Stray,
            ResponseClass::NotReady => Disposition::NotReady,
            ResponseClass::Stable(_) => {
                self.state = State::Resolved;
                Disposition::Resolved(ResponseFrame {
                    source,
                    tcode: packet.tcode(),
                    frame,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcp::avc::{unit, AvcAddr, TAPE_SUBUNIT_0, TUNER_SUBUNIT_0};
    use fcp::{build_read_quadlet, build_write, Speed, FCP_RESPONSE_ADDR};

    const DECK: NodeId = NodeId::local(1);
    const OTHER: NodeId = NodeId::local(4);

    fn write(words: &[u32]) -> Packet {
        build_write(Speed::S400, FCP_RESPONSE_ADDR, words)
    }

    fn play_forward() -> FcpFrame {
        FcpFrame::command(AvcCtype::Control, TAPE_SUBUNIT_0, vcr::PLAY, vcr::PLAY_FORWARD)
    }

    #[test]
    fn idle_frames_are_strays() {
        let mut correlator = Correlator::new();
        assert_eq!(correlator.offer(DECK, &write(&[0x0920_c375])), Disposition::Stray);
        assert_eq!(correlator.state(), State::Idle);
    }

    #[test]
    fn stable_response_resolves() {
        let mut correlator = Correlator::new();
        correlator.arm(&play_forward());
        match correlator.offer(DECK, &write(&[0x0920_c375])) {
            Disposition::Resolved(response) => {
                assert_eq!(response.source, DECK);
                assert_eq!(response.tcode, Tcode::WriteQuadletRequest);
                assert_eq!(response.frame.words(), &[0x0920_c375]);
            }
            other => panic!("unexpected disposition {other:?}"),
        }
        assert_eq!(correlator.state(), State::Resolved);
        assert_eq!(correlator.offer(DECK, &write(&[0x0920_c375])), Disposition::Stray);
    }

    #[test]
    fn operands_do_not_take_part() {
        let mut correlator = Correlator::new();
        correlator.arm(&play_forward());
        assert!(matches!(
            correlator.offer(DECK, &write(&[0x0a20_c331])),
            Disposition::Resolved(_)
        ));
    }

    #[test]
    fn other_opcode_classes_never_resolve() {
        let command = play_forward();
        let mut correlator = Correlator::new();
        correlator.arm(&command);
        let strays = [
            0x0920_c475u32, // wind
            0x0928_c375,    // tuner subunit
            0x0921_c375,    // tape subunit 1
            0x0cff_3007,    // unit info
            0x0c20_d075,
        ];
        for word in strays {
            assert_eq!(correlator.offer(OTHER, &write(&[word, 0xffff_ffff])), Disposition::Stray);
            assert!(matches!(correlator.state(), State::Awaiting { .. }));
        }
    }

    #[test]
    fn interim_only_for_notify() {
        let mut correlator = Correlator::new();
        correlator.arm(&play_forward());
        assert_eq!(correlator.offer(DECK, &write(&[0x0f20_c375])), Disposition::Stray);

        let notify = FcpFrame::command(
            AvcCtype::Notify,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        correlator.arm(&notify);
        assert_eq!(correlator.offer(DECK, &write(&[0x0f20_d07f])), Disposition::Interim);
        assert!(matches!(correlator.state(), State::Awaiting { notify: true, .. }));
        assert!(matches!(
            correlator.offer(DECK, &write(&[0x0d20_c375])),
            Disposition::Resolved(_)
        ));
    }

    #[test]
    fn zero_code_requests_resend() {
        let mut correlator = Correlator::new();
        correlator.arm(&play_forward());
        assert_eq!(correlator.offer(DECK, &write(&[0x0020_c375])), Disposition::NotReady);
        assert!(matches!(correlator.state(), State::Awaiting { .. }));
    }

    #[test]
    fn unsupported_tcode_keeps_waiting() {
        let mut correlator = Correlator::new();
        correlator.arm(&play_forward());
        let read = build_read_quadlet(Speed::S400, FCP_RESPONSE_ADDR);
        assert_eq!(correlator.offer(OTHER, &read), Disposition::UnsupportedTcode(0x4));
        assert!(matches!(correlator.state(), State::Awaiting { .. }));
    }

    #[test]
    fn transport_state_accepts_mode_opcodes() {
        let query = FcpFrame::command(
            AvcCtype::Status,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        let key = CorrelationKey::for_command(&query);
        assert!(key.matches(&FcpFrame::from_words(vec![0x0c20_c375])));
        assert!(key.matches(&FcpFrame::from_words(vec![0x0c20_c460])));
        assert!(key.matches(&FcpFrame::from_words(vec![0x0c20_d07f])));
        assert!(!key.matches(&FcpFrame::from_words(vec![0x0c20_5171])));
        assert!(!key.matches(&FcpFrame::from_words(vec![0x0c28_c375])));

        let control = CorrelationKey::for_command(&play_forward());
        assert!(!control.matches(&FcpFrame::from_words(vec![0x0c20_c475])));

        let tuner = FcpFrame::command(
            AvcCtype::Status,
            TUNER_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        let key = CorrelationKey::for_command(&tuner);
        assert!(!key.matches(&FcpFrame::from_words(vec![0x0c28_c375])));
    }

    #[test]
    fn unit_commands_match_on_unit_address() {
        let query = FcpFrame::command(
            AvcCtype::Status,
            AvcAddr::Unit,
            unit::UNIT_INFO,
            unit::PADDING,
        );
        let key = CorrelationKey::for_command(&query);
        assert_eq!(key.class(), 0x00ff_3000);
        assert!(key.matches(&FcpFrame::from_words(vec![0x0cff_3007, 0x2000_8046])));
    }
}
