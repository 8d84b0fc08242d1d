//! Single send-and-acknowledge cycle of an asynchronous request.

use std::sync::Arc;
use std::time::Duration;

use fcp::{NodeId, Packet};
use tokio::time;
use tracing::{debug, trace};

use crate::bus::{AckCode, Bus, BusError};

/// Classified result of one transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The target accepted the write.
    Complete,
    /// The target accepted the request and will complete it later.
    Pending,
    /// The target asked for the identical packet to be sent again.
    BusyRetry(AckCode),
    /// No acknowledgement arrived.
    Missing,
    /// The bus did not report an acknowledgement within the ack timeout.
    Timeout,
    /// The request was issued for a stale generation and was not transmitted.
    GenerationMismatch { expected: u32, current: u32 },
    /// The target acknowledged with an error.
    Rejected(AckCode),
}

impl Outcome {
    pub fn from_ack(ack: AckCode) -> Self {
        match ack {
            AckCode::Complete => Outcome::Complete,
            AckCode::Pending => Outcome::Pending,
            AckCode::Missing => Outcome::Missing,
            ack if ack.is_busy() => Outcome::BusyRetry(ack),
            ack => Outcome::Rejected(ack),
        }
    }
}

/// Sends one packet and classifies the acknowledgement. Never retries.
#[derive(Clone)]
pub struct TransactionExecutor {
    bus: Arc<dyn Bus>,
    ack_timeout: Duration,
}

impl TransactionExecutor {
    pub fn new(bus: Arc<dyn Bus>, ack_timeout: Duration) -> Self {
        Self { bus, ack_timeout }
    }

    /// Transmit `packet` to `node` as addressed in `generation`.
    ///
    /// The bus generation is read immediately before sending; a request for a
    /// stale generation is never transmitted. `Err` is reserved for failures
    /// of the bus itself.
    pub async fn execute(
        &self,
        node: NodeId,
        generation: u32,
        packet: &Packet,
    ) -> Result<Outcome, BusError> {
        let current = self.bus.current_generation();
        if current != generation {
            debug!(node = %node, expected = generation, current, "generation changed, not sending");
            return Ok(Outcome::GenerationMismatch {
                expected: generation,
                current,
            });
        }

        trace!(
            node = %node,
            generation,
            tcode = ?packet.tcode(),
            offset = packet.offset(),
            bytes = packet.data_length(),
            "sending asynchronous request"
        );
        match time::timeout(
            self.ack_timeout,
            self.bus.send_request(node, generation, packet),
        )
        .await
        {
            Ok(Ok(ack)) => {
                trace!(node = %node, ?ack, "acknowledged");
                Ok(Outcome::from_ack(ack))
            }
            Ok(Err(BusError::StaleGeneration { expected, current })) => {
                debug!(node = %node, expected, current, "bus reset before transmission");
                Ok(Outcome::GenerationMismatch { expected, current })
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                debug!(node = %node, timeout = ?self.ack_timeout, "acknowledgement timed out");
                Ok(Outcome::Timeout)
            }
        }
    }
}
