//! Tape recorder (VCR) subunit commands.
//!
//! `play`, `reverse`, `pause` and the trick play commands first query the
//! transport mode with a TRANSPORT STATE status command and then pick the
//! operand of the control command from the answer. Query and command are two
//! separate transactions: another controller on the bus may change the deck in
//! between, in which case the command acts on the mode seen by the query.

use std::fmt;
use std::str::FromStr;

use fcp::avc::{vcr, AvcCtype, AvcRespCode, TAPE_SUBUNIT_0};
use fcp::FcpFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{response_code, AvcError, AvcUnit};

/// Largest trick play step in either direction.
pub const MAX_TRICK_SPEED: u8 = 14;

/// Operand quadlet of a time code query and the answer of a deck without time code.
const NO_TIME_CODE: u32 = 0xffff_ffff;

/// Operands of FORWARD/BACKWARD after the measurement unit: one mark, padded.
const ONE_INDEX_MARK: u32 = 0x01ff_ffff;

/// Transport mode reported by a TRANSPORT STATE status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "operand", rename_all = "snake_case")]
pub enum TransportState {
    LoadMedium(u8),
    Record(u8),
    Play(u8),
    Wind(u8),
    Unknown { opcode: u8, operand: u8 },
}

impl TransportState {
    /// Decode the mode opcode and operand of a TRANSPORT STATE response.
    pub fn from_response(frame: &FcpFrame) -> Self {
        let operand = frame.operand(0).unwrap_or_default();
        match frame.opcode() {
            vcr::LOAD_MEDIUM => TransportState::LoadMedium(operand),
            vcr::RECORD => TransportState::Record(operand),
            vcr::PLAY => TransportState::Play(operand),
            vcr::WIND => TransportState::Wind(operand),
            opcode => TransportState::Unknown { opcode, operand },
        }
    }

    /// PLAY operand when the deck is playing.
    pub fn play_mode(&self) -> Option<u8> {
        match self {
            TransportState::Play(mode) => Some(*mode),
            _ => None,
        }
    }

    /// RECORD operand when the deck is recording.
    pub fn record_mode(&self) -> Option<u8> {
        match self {
            TransportState::Record(mode) => Some(*mode),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match *self {
            TransportState::LoadMedium(_) => "Loading Medium",
            TransportState::Record(vcr::RECORD_PAUSE) => "Recording Paused",
            TransportState::Record(_) => "Recording",
            TransportState::Play(vcr::PLAY_FAST_FORWARD_1..=vcr::PLAY_FASTEST_FORWARD) => {
                "Playing Fast Forward"
            }
            TransportState::Play(vcr::PLAY_FAST_REVERSE_1..=vcr::PLAY_FASTEST_REVERSE) => {
                "Playing Reverse"
            }
            TransportState::Play(vcr::PLAY_FORWARD_PAUSE) => "Playing Paused",
            TransportState::Play(_) => "Playing",
            TransportState::Wind(vcr::WIND_HIGH_SPEED_REWIND) => "Winding backward at high speed",
            TransportState::Wind(vcr::WIND_STOP) => "Winding stopped",
            TransportState::Wind(vcr::WIND_REWIND) => "Winding reverse",
            TransportState::Wind(vcr::WIND_FAST_FORWARD) => "Winding forward",
            TransportState::Wind(_) => "Winding",
            TransportState::Unknown { .. } => "Unknown",
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// SMPTE style time code with BCD encoded fields, printed as `HH:MM:SS:FF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TimeCode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl TimeCode {
    /// Decode the operand quadlet of a TIME CODE frame (hours in the low byte).
    pub fn from_quadlet(quadlet: u32) -> Self {
        let [frames, seconds, minutes, hours] = quadlet.to_be_bytes();
        Self {
            hours,
            minutes,
            seconds,
            frames,
        }
    }

    pub fn to_quadlet(self) -> u32 {
        u32::from_be_bytes([self.frames, self.seconds, self.minutes, self.hours])
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}

impl FromStr for TimeCode {
    type Err = AvcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = [0u8; 4];
        let mut parts = s.split(':');
        for field in fields.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AvcError::invalid(format!("time code '{s}' needs HH:MM:SS:FF")))?;
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AvcError::invalid(format!(
                    "time code field '{part}' is not a two digit number"
                )));
            }
            *field = u8::from_str_radix(part, 16)
                .map_err(|err| AvcError::invalid(format!("time code field '{part}': {err}")))?;
        }
        if parts.next().is_some() {
            return Err(AvcError::invalid(format!("time code '{s}' has too many fields")));
        }
        let [hours, minutes, seconds, frames] = fields;
        Ok(Self {
            hours,
            minutes,
            seconds,
            frames,
        })
    }
}

impl From<TimeCode> for String {
    fn from(value: TimeCode) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for TimeCode {
    type Error = AvcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// PLAY operand stepping `speed` frames per step, clamped to [`MAX_TRICK_SPEED`].
fn trick_play_operand(speed: i32) -> u8 {
    let step = speed.unsigned_abs().min(u32::from(MAX_TRICK_SPEED)) as u8;
    match speed.signum() {
        0 => vcr::PLAY_FORWARD,
        1 => vcr::PLAY_NEXT_FRAME + step,
        _ => vcr::PLAY_PREVIOUS_FRAME + step,
    }
}

impl AvcUnit {
    /// Query the transport mode of the tape subunit.
    pub async fn transport_status(&self) -> Result<TransportState, AvcError> {
        let frame = FcpFrame::command(
            AvcCtype::Status,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        let response = self.transaction(frame).await?;
        Ok(TransportState::from_response(&response.frame))
    }

    /// PLAY operand of the current mode, `None` when the deck is not playing.
    pub async fn is_playing(&self) -> Result<Option<u8>, AvcError> {
        Ok(self.transport_status().await?.play_mode())
    }

    /// RECORD operand of the current mode, `None` when the deck is not recording.
    pub async fn is_recording(&self) -> Result<Option<u8>, AvcError> {
        Ok(self.transport_status().await?.record_mode())
    }

    /// Mode probe preceding a control command. A deck that does not answer
    /// reads as idle; errors that would also fail the command are returned.
    async fn probe(&self, mode: fn(&TransportState) -> Option<u8>) -> Result<Option<u8>, AvcError> {
        match self.transport_status().await {
            Ok(state) => {
                debug!(node = %self.node(), %state, "transport mode");
                Ok(mode(&state))
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!(node = %self.node(), %err, "transport mode query failed, assuming idle");
                Ok(None)
            }
        }
    }

    async fn tape_control(&self, opcode: u8, operand: u8) -> Result<AvcRespCode, AvcError> {
        self.control(TAPE_SUBUNIT_0, opcode, operand).await
    }

    pub async fn eject(&self) -> Result<AvcRespCode, AvcError> {
        self.tape_control(vcr::LOAD_MEDIUM, vcr::LOAD_MEDIUM_EJECT).await
    }

    pub async fn stop(&self) -> Result<AvcRespCode, AvcError> {
        self.tape_control(vcr::WIND, vcr::WIND_STOP).await
    }

    /// Start forward playback; a deck already playing forward drops to the
    /// slowest forward speed, any other mode goes to normal forward.
    pub async fn play(&self) -> Result<AvcRespCode, AvcError> {
        let operand = match self.probe(TransportState::play_mode).await? {
            Some(vcr::PLAY_FORWARD) => vcr::PLAY_SLOWEST_FORWARD,
            _ => vcr::PLAY_FORWARD,
        };
        self.tape_control(vcr::PLAY, operand).await
    }

    /// Start reverse playback, mirroring [`AvcUnit::play`].
    pub async fn reverse(&self) -> Result<AvcRespCode, AvcError> {
        let operand = match self.probe(TransportState::play_mode).await? {
            Some(vcr::PLAY_REVERSE) => vcr::PLAY_SLOWEST_REVERSE,
            _ => vcr::PLAY_REVERSE,
        };
        self.tape_control(vcr::PLAY, operand).await
    }

    /// Toggle pause: record pause while recording, forward pause otherwise.
    pub async fn pause(&self) -> Result<AvcRespCode, AvcError> {
        if let Some(mode) = self.probe(TransportState::record_mode).await? {
            let operand = if mode == vcr::RECORD_PAUSE {
                vcr::RECORD_RECORD
            } else {
                vcr::RECORD_PAUSE
            };
            return self.tape_control(vcr::RECORD, operand).await;
        }
        let operand = match self.probe(TransportState::play_mode).await? {
            Some(vcr::PLAY_FORWARD_PAUSE) => vcr::PLAY_FORWARD,
            _ => vcr::PLAY_FORWARD_PAUSE,
        };
        self.tape_control(vcr::PLAY, operand).await
    }

    pub async fn record(&self) -> Result<AvcRespCode, AvcError> {
        self.tape_control(vcr::RECORD, vcr::RECORD_RECORD).await
    }

    /// Fastest reverse playback while playing, rewind otherwise.
    pub async fn rewind(&self) -> Result<AvcRespCode, AvcError> {
        match self.probe(TransportState::play_mode).await? {
            Some(_) => self.tape_control(vcr::PLAY, vcr::PLAY_FASTEST_REVERSE).await,
            None => self.tape_control(vcr::WIND, vcr::WIND_REWIND).await,
        }
    }

    /// Fastest forward playback while playing, fast forward wind otherwise.
    pub async fn fast_forward(&self) -> Result<AvcRespCode, AvcError> {
        match self.probe(TransportState::play_mode).await? {
            Some(_) => self.tape_control(vcr::PLAY, vcr::PLAY_FASTEST_FORWARD).await,
            None => self.tape_control(vcr::WIND, vcr::WIND_FAST_FORWARD).await,
        }
    }

    /// Step one frame forward. Sent only while playing; `None` otherwise.
    pub async fn next_frame(&self) -> Result<Option<AvcRespCode>, AvcError> {
        self.while_playing(FcpFrame::command(
            AvcCtype::Control,
            TAPE_SUBUNIT_0,
            vcr::PLAY,
            vcr::PLAY_NEXT_FRAME,
        ))
        .await
    }

    /// Step one frame back. Sent only while playing; `None` otherwise.
    pub async fn previous_frame(&self) -> Result<Option<AvcRespCode>, AvcError> {
        self.while_playing(FcpFrame::command(
            AvcCtype::Control,
            TAPE_SUBUNIT_0,
            vcr::PLAY,
            vcr::PLAY_PREVIOUS_FRAME,
        ))
        .await
    }

    /// Skip to the next index mark. Sent only while playing.
    pub async fn next_index(&self) -> Result<Option<AvcRespCode>, AvcError> {
        self.while_playing(
            FcpFrame::command(
                AvcCtype::Control,
                TAPE_SUBUNIT_0,
                vcr::FORWARD,
                vcr::MEASUREMENT_INDEX,
            )
            .with_quadlet(ONE_INDEX_MARK),
        )
        .await
    }

    /// Skip back to the previous index mark. Sent only while playing.
    pub async fn previous_index(&self) -> Result<Option<AvcRespCode>, AvcError> {
        self.while_playing(
            FcpFrame::command(
                AvcCtype::Control,
                TAPE_SUBUNIT_0,
                vcr::BACKWARD,
                vcr::MEASUREMENT_INDEX,
            )
            .with_quadlet(ONE_INDEX_MARK),
        )
        .await
    }

    /// Variable speed playback: `0` plays forward, positive values step
    /// forward and negative values step back, at most [`MAX_TRICK_SPEED`]
    /// frames per step. Refused with `None` while recording.
    pub async fn trick_play(&self, speed: i32) -> Result<Option<AvcRespCode>, AvcError> {
        if let Some(mode) = self.probe(TransportState::record_mode).await? {
            debug!(node = %self.node(), mode, "recording, trick play not sent");
            return Ok(None);
        }
        self.tape_control(vcr::PLAY, trick_play_operand(speed))
            .await
            .map(Some)
    }

    async fn while_playing(&self, frame: FcpFrame) -> Result<Option<AvcRespCode>, AvcError> {
        if self.probe(TransportState::play_mode).await?.is_none() {
            debug!(node = %self.node(), command = %frame, "not playing, command not sent");
            return Ok(None);
        }
        let response = self.transaction(frame).await?;
        Ok(Some(response_code(&response.frame)))
    }

    /// Read the time code at the tape position; `None` when the deck has none.
    pub async fn timecode(&self) -> Result<Option<TimeCode>, AvcError> {
        let frame = FcpFrame::command(
            AvcCtype::Status,
            TAPE_SUBUNIT_0,
            vcr::TIME_CODE,
            vcr::TIME_CODE_STATUS,
        )
        .with_quadlet(NO_TIME_CODE);
        let response = self.transaction(frame).await?;
        match response.frame.quadlet(1) {
            Some(NO_TIME_CODE) => Ok(None),
            Some(quadlet) => Ok(Some(TimeCode::from_quadlet(quadlet))),
            None => Err(AvcError::unexpected(format!(
                "time code response without operands: {}",
                response.frame
            ))),
        }
    }

    /// Wind the tape to `position`.
    pub async fn seek_timecode(&self, position: TimeCode) -> Result<AvcRespCode, AvcError> {
        let frame = FcpFrame::command(
            AvcCtype::Control,
            TAPE_SUBUNIT_0,
            vcr::TIME_CODE,
            vcr::TIME_CODE_CONTROL,
        )
        .with_quadlet(position.to_quadlet());
        let response = self.transaction(frame).await?;
        Ok(response_code(&response.frame))
    }
}
