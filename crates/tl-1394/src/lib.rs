//! IEEE 1394 TL: asynchronous transactions, FCP response correlation and the
//! per-bus AV/C command server.
//!
//! The crate talks to the bus only through the [`Bus`] trait; [`sim::SimBus`]
//! provides an in-memory implementation.

pub mod bus;
pub mod config;
pub mod correlator;
pub mod server;
pub mod sim;
pub mod transaction;

use thiserror::Error;

pub use bus::{AckCode, AddressRange, Bus, BusError, InboundRequest, ListenerId, RCode};
pub use config::{BusyBudget, ServerConfig};
pub use correlator::{CorrelationKey, Correlator, Disposition, ResponseFrame};
pub use server::{CommandRequest, CommandServer, ServerHandle};
pub use transaction::{Outcome, TransactionExecutor};

/// Transport protocol constants.
pub mod consts {
    use std::time::Duration;

    pub use fcp::{FCP_COMMAND_ADDR, FCP_REGISTER_SIZE, FCP_RESPONSE_ADDR};

    /// Protocol retries after the first transmission of a command.
    pub const MAX_RETRIES: u32 = 2;
    /// Delay before re-sending a frame the target acknowledged busy.
    pub const BUSY_DELAY: Duration = Duration::from_millis(20);
    /// Time allowed for the link-layer acknowledgement of one packet.
    pub const ACK_TIMEOUT: Duration = Duration::from_millis(50);
    /// Time allowed for a correlated FCP response after the command was acknowledged.
    pub const SPLIT_TIMEOUT: Duration = Duration::from_millis(100);
    /// Time allowed for the final response after an interim response.
    pub const INTERIM_TIMEOUT: Duration = Duration::from_secs(10);
    /// Commands that may wait in the server queue.
    pub const QUEUE_DEPTH: usize = 32;
}

/// Errors surfaced to callers of the command server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("target acknowledged busy ({0:?})")]
    TransportBusy(AckCode),
    #[error("no acknowledgement from target")]
    TransportMissing,
    #[error("no correlated response within the timeout")]
    TransportTimeout,
    #[error("target answered with a zero response code")]
    ResponseNotReady,
    #[error("bus generation changed from {expected} to {current}")]
    GenerationChanged { expected: u32, current: u32 },
    #[error("response frame with unsupported transaction code {tcode:#03x}")]
    ProtocolTypeError { tcode: u8 },
    #[error("command server is shutting down")]
    ServerShuttingDown,
    #[error("system resource: {0}")]
    SystemResource(String),
    #[error("target rejected the request with {0:?}")]
    Rejected(AckCode),
    #[error("retry exceeded after {attempts} attempts (last: {last})")]
    RetryExceeded {
        attempts: u32,
        last: Box<ProtocolError>,
    },
}

impl ProtocolError {
    /// Whether re-issuing the same command against the same node is pointless.
    ///
    /// Generation changes need the node to be re-resolved; shutdown and
    /// resource failures outlive any single command.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::GenerationChanged { .. }
                | ProtocolError::ServerShuttingDown
                | ProtocolError::SystemResource(_)
        )
    }
}

impl From<BusError> for ProtocolError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::StaleGeneration { expected, current } => {
                ProtocolError::GenerationChanged { expected, current }
            }
            other => ProtocolError::SystemResource(other.to_string()),
        }
    }
}
