//! Interface to the host controller driving one IEEE 1394 bus.

use std::fmt;

use async_trait::async_trait;
use fcp::{NodeId, Packet, Speed};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::consts;

/// Link-layer acknowledgement of an asynchronous packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    Complete,
    Pending,
    BusyX,
    BusyA,
    BusyB,
    Tardy,
    ConflictError,
    DataError,
    TypeError,
    AddressError,
    /// No acknowledgement was received.
    Missing,
    Other(u8),
}

impl AckCode {
    /// Convert from the raw 4-bit ack code.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0x1 => AckCode::Complete,
            0x2 => AckCode::Pending,
            0x4 => AckCode::BusyX,
            0x5 => AckCode::BusyA,
            0x6 => AckCode::BusyB,
            0xb => AckCode::Tardy,
            0xc => AckCode::ConflictError,
            0xd => AckCode::DataError,
            0xe => AckCode::TypeError,
            0xf => AckCode::AddressError,
            other => AckCode::Other(other),
        }
    }

    /// Raw 4-bit ack code; `None` when no acknowledgement was received.
    pub const fn to_raw(self) -> Option<u8> {
        Some(match self {
            AckCode::Complete => 0x1,
            AckCode::Pending => 0x2,
            AckCode::BusyX => 0x4,
            AckCode::BusyA => 0x5,
            AckCode::BusyB => 0x6,
            AckCode::Tardy => 0xb,
            AckCode::ConflictError => 0xc,
            AckCode::DataError => 0xd,
            AckCode::TypeError => 0xe,
            AckCode::AddressError => 0xf,
            AckCode::Missing => return None,
            AckCode::Other(raw) => raw,
        })
    }

    /// Whether the target asked for the identical packet to be sent again.
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            AckCode::BusyX | AckCode::BusyA | AckCode::BusyB | AckCode::Tardy
        )
    }
}

/// Response code returned to the sender of an inbound write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RCode {
    Complete,
    ConflictError,
    DataError,
    TypeError,
    AddressError,
}

impl RCode {
    pub const fn to_raw(self) -> u8 {
        match self {
            RCode::Complete => 0x0,
            RCode::ConflictError => 0x4,
            RCode::DataError => 0x5,
            RCode::TypeError => 0x6,
            RCode::AddressError => 0x7,
        }
    }
}

/// Range of 48-bit CSR offsets handled by a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u64,
    pub len: u64,
}

impl AddressRange {
    pub const fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// The FCP response register of the local node.
    pub const fn fcp_response() -> Self {
        Self::new(consts::FCP_RESPONSE_ADDR, consts::FCP_REGISTER_SIZE)
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset - self.start < self.len
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.start < other.start.saturating_add(other.len)
            && other.start < self.start.saturating_add(self.len)
    }
}

/// Handle of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// An asynchronous write that landed in a listener's address range.
///
/// The bus completes the remote transaction with the rcode passed to
/// [`InboundRequest::respond`]. Dropping the request unanswered completes it
/// with an address error.
#[derive(Debug)]
pub struct InboundRequest {
    source: NodeId,
    generation: u32,
    packet: Packet,
    responder: oneshot::Sender<RCode>,
}

impl InboundRequest {
    /// Create a request and the receiver on which its rcode arrives.
    pub fn new(source: NodeId, generation: u32, packet: Packet) -> (Self, oneshot::Receiver<RCode>) {
        let (responder, rx) = oneshot::channel();
        (
            Self {
                source,
                generation,
                packet,
                responder,
            },
            rx,
        )
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Complete the remote transaction.
    pub fn respond(self, rcode: RCode) {
        // The remote side may already have given up on the transaction.
        let _ = self.responder.send(rcode);
    }
}

/// Sink receiving the inbound requests of one listener.
pub type InboundSink = mpsc::UnboundedSender<InboundRequest>;

/// Errors reported by a bus implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("request issued for generation {expected} but the bus is at {current}")]
    StaleGeneration { expected: u32, current: u32 },
    #[error("address range {start:#014x}+{len:#x} is already claimed")]
    AddressInUse { start: u64, len: u64 },
    #[error("unknown {0}")]
    UnknownListener(ListenerId),
    #[error("bus io: {0}")]
    Io(String),
}

/// Host controller operations the transport layer consumes.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Transmit one asynchronous request and return its link-layer acknowledgement.
    ///
    /// Implementations must refuse to transmit when `generation` is not the
    /// current bus generation.
    async fn send_request(
        &self,
        node: NodeId,
        generation: u32,
        packet: &Packet,
    ) -> Result<AckCode, BusError>;

    /// Deliver inbound writes to `range` into `sink` until unregistered.
    async fn register_listener(
        &self,
        range: AddressRange,
        sink: InboundSink,
    ) -> Result<ListenerId, BusError>;

    async fn unregister_listener(&self, id: ListenerId) -> Result<(), BusError>;

    /// Generation counter, incremented on every bus reset.
    fn current_generation(&self) -> u32;

    fn local_node_id(&self) -> NodeId;

    /// Highest speed usable for asynchronous requests on this bus.
    fn max_speed(&self) -> Speed;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_codes() {
        for raw in [0x1, 0x2, 0x4, 0x5, 0x6, 0xb, 0xc, 0xd, 0xe, 0xf, 0x3] {
            assert_eq!(AckCode::from_raw(raw).to_raw(), Some(raw));
        }
        assert_eq!(AckCode::Missing.to_raw(), None);
        assert!(AckCode::BusyA.is_busy());
        assert!(!AckCode::Complete.is_busy());
        assert!(!AckCode::AddressError.is_busy());
    }

    #[test]
    fn fcp_response_range() {
        let range = AddressRange::fcp_response();
        assert!(range.contains(consts::FCP_RESPONSE_ADDR));
        assert!(range.contains(consts::FCP_RESPONSE_ADDR + 0x1fc));
        assert!(!range.contains(consts::FCP_RESPONSE_ADDR + 0x200));
        assert!(!range.contains(consts::FCP_COMMAND_ADDR));
        assert!(range.overlaps(&AddressRange::new(consts::FCP_RESPONSE_ADDR + 4, 4)));
        assert!(!range.overlaps(&AddressRange::new(consts::FCP_COMMAND_ADDR, 0x200)));
    }

    #[tokio::test]
    async fn dropped_request_closes_responder() {
        let (request, rx) = InboundRequest::new(
            NodeId::local(1),
            0,
            fcp::build_write_quadlet(Speed::S400, consts::FCP_RESPONSE_ADDR, 0),
        );
        drop(request);
        assert!(rx.await.is_err());
    }
}
