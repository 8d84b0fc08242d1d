//! Simulated AV/C tape recorder for [`SimBus`](tl_1394::sim::SimBus).

use fcp::avc::{
    pack_first_quadlet, unit, vcr, AvcAddr, AvcCtype, AvcRespCode, AvcSubunitType, CODE_SHIFT,
    TAPE_SUBUNIT_0,
};
use fcp::FcpFrame;
use tl_1394::sim::{SimDevice, SimReaction};
use tracing::debug;

use crate::vcr::{TimeCode, TransportState};

const NO_OPERAND: u32 = 0xffff_ffff;

/// A unit holding one tape subunit that answers every command immediately.
///
/// Transport control commands switch the reported mode to the commanded
/// opcode and operand. FORWARD/BACKWARD are only accepted while playing and
/// time code seeks only when the tape carries time code.
#[derive(Debug, Clone)]
pub struct SimTapeDeck {
    mode: (u8, u8),
    time_code: Option<u32>,
    company_id: u32,
    subunit_pages: [Option<u32>; unit::SUBUNIT_INFO_PAGES],
}

impl Default for SimTapeDeck {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTapeDeck {
    /// A stopped deck at time code `00:00:00:00` reporting one tape subunit on page 0.
    pub fn new() -> Self {
        let mut subunit_pages = [None; unit::SUBUNIT_INFO_PAGES];
        subunit_pages[0] = Some(u32::from_be_bytes([
            AvcSubunitType::Tape.to_raw() << 3,
            unit::EMPTY_ENTRY,
            unit::EMPTY_ENTRY,
            unit::EMPTY_ENTRY,
        ]));
        Self {
            mode: (vcr::WIND, vcr::WIND_STOP),
            time_code: Some(TimeCode::default().to_quadlet()),
            company_id: 0,
            subunit_pages,
        }
    }

    pub fn with_transport(mut self, opcode: u8, operand: u8) -> Self {
        self.mode = (opcode, operand);
        self
    }

    /// Tape position; `None` for a tape without time code.
    pub fn with_time_code(mut self, time_code: Option<TimeCode>) -> Self {
        self.time_code = time_code.map(TimeCode::to_quadlet);
        self
    }

    pub fn with_company_id(mut self, company_id: u32) -> Self {
        self.company_id = company_id & 0x00ff_ffff;
        self
    }

    /// Entry word of SUBUNIT INFO `page`; `None` answers NOT IMPLEMENTED.
    pub fn with_subunit_page(mut self, page: usize, entry: Option<u32>) -> Self {
        if let Some(slot) = self.subunit_pages.get_mut(page) {
            *slot = entry;
        }
        self
    }

    pub fn transport(&self) -> TransportState {
        let (opcode, operand) = self.mode;
        TransportState::from_response(&FcpFrame::from_words(vec![pack_first_quadlet(
            AvcRespCode::ImplementedStable.to_raw(),
            TAPE_SUBUNIT_0,
            opcode,
            operand,
        )]))
    }

    fn answer(&mut self, command: &FcpFrame) -> FcpFrame {
        let operand = command.operand(0).unwrap_or_default();
        match (command.ctype(), command.address(), command.opcode()) {
            (AvcCtype::Status, AvcAddr::Unit, unit::UNIT_INFO) => {
                let first = pack_first_quadlet(
                    AvcRespCode::ImplementedStable.to_raw(),
                    AvcAddr::Unit,
                    unit::UNIT_INFO,
                    unit::UNIT_INFO_OPERAND,
                );
                let unit_byte = u32::from(AvcSubunitType::Tape.to_raw() << 3);
                FcpFrame::from_words(vec![first, (unit_byte << 24) | self.company_id])
            }
            (AvcCtype::Status, AvcAddr::Unit, unit::SUBUNIT_INFO) => {
                let page = usize::from((operand >> 4) & 0x07);
                match self.subunit_pages[page] {
                    Some(entry) => reply(command, AvcRespCode::ImplementedStable, Some(entry)),
                    None => reply(command, AvcRespCode::NotImplemented, None),
                }
            }
            (ctype, TAPE_SUBUNIT_0, opcode) => self.tape(command, ctype, opcode, operand),
            _ => reply(command, AvcRespCode::NotImplemented, None),
        }
    }

    fn tape(&mut self, command: &FcpFrame, ctype: AvcCtype, opcode: u8, operand: u8) -> FcpFrame {
        let playing = self.mode.0 == vcr::PLAY;
        match (ctype, opcode) {
            (AvcCtype::Status, vcr::TRANSPORT_STATE) => FcpFrame::from_words(vec![pack_first_quadlet(
                AvcRespCode::ImplementedStable.to_raw(),
                TAPE_SUBUNIT_0,
                self.mode.0,
                self.mode.1,
            )]),
            (AvcCtype::Control, vcr::LOAD_MEDIUM | vcr::RECORD | vcr::PLAY | vcr::WIND) => {
                self.mode = (opcode, operand);
                reply(command, AvcRespCode::Accepted, None)
            }
            (AvcCtype::Control, vcr::FORWARD | vcr::BACKWARD) if playing => {
                reply(command, AvcRespCode::Accepted, None)
            }
            (AvcCtype::Control, vcr::FORWARD | vcr::BACKWARD) => {
                reply(command, AvcRespCode::Rejected, None)
            }
            (AvcCtype::Status, vcr::TIME_CODE) => reply(
                command,
                AvcRespCode::ImplementedStable,
                Some(self.time_code.unwrap_or(NO_OPERAND)),
            ),
            (AvcCtype::Control, vcr::TIME_CODE) => match (self.time_code, command.quadlet(1)) {
                (Some(_), Some(target)) => {
                    self.time_code = Some(target);
                    self.mode = (vcr::WIND, vcr::WIND_STOP);
                    reply(command, AvcRespCode::Accepted, None)
                }
                _ => reply(command, AvcRespCode::Rejected, None),
            },
            _ => reply(command, AvcRespCode::NotImplemented, None),
        }
    }
}

/// Echo `command` with the response `code`, optionally replacing its second quadlet.
fn reply(command: &FcpFrame, code: AvcRespCode, operands: Option<u32>) -> FcpFrame {
    let mut words = command.words().to_vec();
    if let Some(first) = words.first_mut() {
        *first = (*first & 0x00ff_ffff) | (u32::from(code.to_raw()) << CODE_SHIFT);
    }
    if let Some(operands) = operands {
        match words.get_mut(1) {
            Some(word) => *word = operands,
            None => words.push(operands),
        }
    }
    FcpFrame::from_words(words)
}

impl SimDevice for SimTapeDeck {
    fn on_command(&mut self, frame: &FcpFrame) -> SimReaction {
        let response = self.answer(frame);
        debug!(command = %frame, %response, "tape deck answered");
        SimReaction::respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(opcode: u8, operand: u8) -> FcpFrame {
        FcpFrame::command(AvcCtype::Status, TAPE_SUBUNIT_0, opcode, operand)
    }

    #[test]
    fn control_commands_switch_the_mode() {
        let mut deck = SimTapeDeck::new();
        assert_eq!(deck.transport(), TransportState::Wind(vcr::WIND_STOP));
        let response = deck.answer(&FcpFrame::command(
            AvcCtype::Control,
            TAPE_SUBUNIT_0,
            vcr::PLAY,
            vcr::PLAY_FORWARD,
        ));
        assert_eq!(response.words(), &[0x0920_c375]);
        assert_eq!(deck.transport(), TransportState::Play(vcr::PLAY_FORWARD));
        let response = deck.answer(&status(vcr::TRANSPORT_STATE, vcr::TRANSPORT_STATE_INQUIRY));
        assert_eq!(response.words(), &[0x0c20_c375]);
    }

    #[test]
    fn unknown_commands_are_not_implemented() {
        let mut deck = SimTapeDeck::new();
        let response = deck.answer(&status(0x70, 0xff));
        assert_eq!(response.words(), &[0x0820_70ff]);
        let tuner = FcpFrame::command(
            AvcCtype::Status,
            fcp::avc::TUNER_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        assert_eq!(deck.answer(&tuner).code(), AvcRespCode::NotImplemented.to_raw());
    }

    #[test]
    fn time_code_query_replaces_the_padding() {
        let mut deck = SimTapeDeck::new().with_time_code(Some(TimeCode {
            hours: 0x01,
            minutes: 0x02,
            seconds: 0x03,
            frames: 0x04,
        }));
        let query = status(vcr::TIME_CODE, vcr::TIME_CODE_STATUS).with_quadlet(NO_OPERAND);
        assert_eq!(deck.answer(&query).words(), &[0x0c20_5171, 0x0403_0201]);
    }
}
