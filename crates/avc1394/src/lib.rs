#![cfg_attr(docsrs, feature(doc_cfg))]
//! High level AV/C facade that re-exports the workspace crates and drives
//! tape recorder and unit commands through a per-bus command server.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use avc1394::sim::SimTapeDeck;
//! use avc1394::tl::sim::SimBus;
//! use avc1394::tl::{CommandServer, ServerConfig};
//! use avc1394::{AvcError, AvcUnit, NodeId};
//!
//! # async fn run() -> Result<(), AvcError> {
//! let bus = SimBus::new();
//! let deck = NodeId::local(1);
//! bus.add_device(deck, SimTapeDeck::new());
//!
//! let server = CommandServer::spawn(Arc::new(bus), ServerConfig::default());
//! let unit = AvcUnit::new(server.handle(), deck);
//! unit.play().await?;
//! println!("deck is {}", unit.transport_status().await?);
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use fcp;
pub use tl_1394 as tl;

pub use fcp::avc::{AvcAddr, AvcCtype, AvcRespCode, AvcSubunitType};
pub use fcp::{FcpFrame, NodeId};
pub use tl_1394::{ProtocolError, ResponseFrame};

pub mod sim;
pub mod unit;
pub mod vcr;

use fcp::avc::ResponseClass;
use thiserror::Error;
use tl_1394::{CommandRequest, ServerHandle};
use tracing::debug;

pub use unit::{SubunitScan, UnitInfo};
pub use vcr::{TimeCode, TransportState};

/// Error type produced by the AV/C command library.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AvcError {
    /// The command never got a correlated final response.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A response arrived but did not carry the expected fields.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    /// A caller supplied value could not be encoded.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl AvcError {
    fn unexpected<S: Into<String>>(msg: S) -> Self {
        AvcError::UnexpectedResponse(msg.into())
    }

    fn invalid<S: Into<String>>(msg: S) -> Self {
        AvcError::InvalidArgument(msg.into())
    }

    /// Whether the error outlives the command that produced it.
    pub fn is_fatal(&self) -> bool {
        match self {
            AvcError::Protocol(err) => err.is_fatal(),
            _ => false,
        }
    }
}

/// One AV/C unit on the bus, addressed through a shared [`ServerHandle`].
#[derive(Clone)]
pub struct AvcUnit {
    server: ServerHandle,
    node: NodeId,
    retries: Option<u32>,
    generation: Option<u32>,
}

impl AvcUnit {
    /// Address the unit at `node` through `server`.
    pub fn new(server: ServerHandle, node: NodeId) -> Self {
        Self {
            server,
            node,
            retries: None,
            generation: None,
        }
    }

    /// Override the server's protocol retry count for commands of this unit.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Pin commands to the bus generation `node` was resolved in.
    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Execute an arbitrary command frame and return the correlated response.
    pub async fn transaction(&self, frame: FcpFrame) -> Result<ResponseFrame, AvcError> {
        let mut request = CommandRequest::new(self.node, frame);
        if let Some(retries) = self.retries {
            request = request.with_retries(retries);
        }
        if let Some(generation) = self.generation {
            request = request.with_generation(generation);
        }
        let response = self.server.execute(request).await?;
        debug!(node = %self.node, response = %response.frame, "command answered");
        Ok(response)
    }

    /// Execute a single-quadlet control command and return its response code.
    pub(crate) async fn control(
        &self,
        addr: AvcAddr,
        opcode: u8,
        operand: u8,
    ) -> Result<AvcRespCode, AvcError> {
        let frame = FcpFrame::command(AvcCtype::Control, addr, opcode, operand);
        self.transaction(frame).await.map(|r| response_code(&r.frame))
    }
}

/// Final response code of a correlated frame.
pub(crate) fn response_code(frame: &FcpFrame) -> AvcRespCode {
    match frame.response_class() {
        ResponseClass::Stable(code) => code,
        ResponseClass::Interim => AvcRespCode::Interim,
        ResponseClass::NotReady => AvcRespCode::Reserved(0),
    }
}
