//! In-memory bus used by tests, demos and the command-line tool.
//!
//! Nodes are [`SimDevice`] implementations reacting to FCP command frames.
//! Transaction labels are not modelled: every packet is rendered with label 0,
//! so re-sends of the same packet produce the same wire bytes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fcp::{build_write, decode_response, FcpFrame, NodeId, Packet, Speed};
use tracing::{debug, info, trace};

use crate::bus::{AckCode, AddressRange, Bus, BusError, InboundRequest, InboundSink, ListenerId, RCode};
use crate::consts;

/// A simulated node answering FCP commands.
pub trait SimDevice: Send {
    fn on_command(&mut self, frame: &FcpFrame) -> SimReaction;
}

impl<F> SimDevice for F
where
    F: FnMut(&FcpFrame) -> SimReaction + Send,
{
    fn on_command(&mut self, frame: &FcpFrame) -> SimReaction {
        self(frame)
    }
}

/// A write the device performs on the controller's response register.
#[derive(Debug, Clone)]
pub struct SimResponse {
    pub packet: Packet,
    pub delay: Duration,
}

/// How a device reacts to one command.
#[derive(Debug, Clone)]
pub struct SimReaction {
    pub ack: AckCode,
    /// Time before the acknowledgement is reported.
    pub ack_delay: Option<Duration>,
    pub responses: Vec<SimResponse>,
    /// Reset the bus after acknowledging.
    pub bus_reset: bool,
}

impl SimReaction {
    /// Acknowledge without answering.
    pub fn ack(ack: AckCode) -> Self {
        Self {
            ack,
            ack_delay: None,
            responses: Vec::new(),
            bus_reset: false,
        }
    }

    /// Acknowledge and answer immediately with `frame`.
    pub fn respond(frame: FcpFrame) -> Self {
        Self::ack(AckCode::Complete).with_response(frame)
    }

    pub fn with_response(self, frame: FcpFrame) -> Self {
        self.with_delayed_response(frame, Duration::ZERO)
    }

    pub fn with_delayed_response(self, frame: FcpFrame, delay: Duration) -> Self {
        let packet = build_write(Speed::S400, consts::FCP_RESPONSE_ADDR, frame.words());
        self.with_packet(packet, delay)
    }

    /// Answer with an arbitrary packet, e.g. one with an unsupported tcode.
    pub fn with_packet(mut self, packet: Packet, delay: Duration) -> Self {
        self.responses.push(SimResponse { packet, delay });
        self
    }

    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    pub fn with_bus_reset(mut self) -> Self {
        self.bus_reset = true;
        self
    }
}

/// A packet transmitted through [`SimBus::send_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub destination: NodeId,
    pub generation: u32,
    pub packet: Packet,
    pub wire: Bytes,
}

/// Inbound write and the rcode it was completed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub source: NodeId,
    pub offset: u64,
    pub rcode: RCode,
}

struct Listener {
    id: ListenerId,
    range: AddressRange,
    sink: InboundSink,
}

#[derive(Default)]
struct State {
    devices: HashMap<NodeId, Box<dyn SimDevice>>,
    listeners: Vec<Listener>,
    next_listener: u64,
    sent: Vec<SentPacket>,
    completions: Vec<Completion>,
}

struct Shared {
    local: NodeId,
    speed: Speed,
    generation: AtomicU32,
    state: Mutex<State>,
}

/// In-memory [`Bus`] implementation. Clones share the same bus.
#[derive(Clone)]
pub struct SimBus {
    shared: Arc<Shared>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// Bus with the controller at physical id 0.
    pub fn new() -> Self {
        Self::with_local_node(NodeId::local(0))
    }

    pub fn with_local_node(local: NodeId) -> Self {
        Self {
            shared: Arc::new(Shared {
                local,
                speed: Speed::S400,
                generation: AtomicU32::new(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device at `node`, replacing any previous one.
    pub fn add_device(&self, node: NodeId, device: impl SimDevice + 'static) {
        debug!(node = %node, "sim device attached");
        self.state().devices.insert(node, Box::new(device));
    }

    /// Increment the generation as a bus reset would.
    pub fn bus_reset(&self) -> u32 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "sim bus reset");
        generation
    }

    /// Every packet handed to [`Bus::send_request`] so far.
    pub fn sent(&self) -> Vec<SentPacket> {
        self.state().sent.clone()
    }

    /// Every inbound write delivered so far, with the rcode it completed with.
    pub fn completions(&self) -> Vec<Completion> {
        self.state().completions.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Perform a write request from `source` to the local node and return its rcode.
    ///
    /// Writes outside every registered listener range complete with an address error.
    pub async fn write(&self, source: NodeId, packet: Packet) -> RCode {
        let offset = packet.offset();
        let sink = self
            .state()
            .listeners
            .iter()
            .find(|listener| listener.range.contains(offset))
            .map(|listener| listener.sink.clone());
        let rcode = match sink {
            None => RCode::AddressError,
            Some(sink) => {
                let (request, rx) = InboundRequest::new(source, self.current_generation(), packet);
                match sink.send(request) {
                    Ok(()) => rx.await.unwrap_or(RCode::AddressError),
                    Err(_) => RCode::AddressError,
                }
            }
        };
        trace!(source = %source, offset, ?rcode, "sim write completed");
        self.state().completions.push(Completion {
            source,
            offset,
            rcode,
        });
        rcode
    }

    /// Perform [`SimBus::write`] from a background task after `delay`.
    pub fn schedule_write(&self, source: NodeId, packet: Packet, delay: Duration) {
        let bus = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            bus.write(source, packet).await;
        });
    }

    /// Write an FCP frame from `source` to the response register in the background.
    pub fn inject_response(&self, source: NodeId, frame: &FcpFrame, delay: Duration) {
        let packet = build_write(self.shared.speed, consts::FCP_RESPONSE_ADDR, frame.words());
        self.schedule_write(source, packet, delay);
    }
}

#[async_trait]
impl Bus for SimBus {
    async fn send_request(
        &self,
        node: NodeId,
        generation: u32,
        packet: &Packet,
    ) -> Result<AckCode, BusError> {
        let current = self.current_generation();
        if generation != current {
            return Err(BusError::StaleGeneration {
                expected: generation,
                current,
            });
        }

        let reaction = {
            let mut state = self.state();
            state.sent.push(SentPacket {
                destination: node,
                generation,
                packet: packet.clone(),
                wire: packet.to_wire(node, self.shared.local, 0),
            });
            let Some(device) = state.devices.get_mut(&node) else {
                return Ok(AckCode::Missing);
            };
            if packet.offset() != consts::FCP_COMMAND_ADDR {
                return Ok(AckCode::AddressError);
            }
            match decode_response(packet) {
                Ok(frame) => device.on_command(&frame),
                Err(_) => return Ok(AckCode::TypeError),
            }
        };

        if let Some(delay) = reaction.ack_delay {
            tokio::time::sleep(delay).await;
        }
        for response in reaction.responses {
            self.schedule_write(node, response.packet, response.delay);
        }
        if reaction.bus_reset {
            self.bus_reset();
        }
        Ok(reaction.ack)
    }

    async fn register_listener(
        &self,
        range: AddressRange,
        sink: InboundSink,
    ) -> Result<ListenerId, BusError> {
        let mut state = self.state();
        if state
            .listeners
            .iter()
            .any(|listener| listener.range.overlaps(&range))
        {
            return Err(BusError::AddressInUse {
                start: range.start,
                len: range.len,
            });
        }
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.push(Listener { id, range, sink });
        trace!(%id, start = range.start, len = range.len, "listener registered");
        Ok(id)
    }

    async fn unregister_listener(&self, id: ListenerId) -> Result<(), BusError> {
        let mut state = self.state();
        let before = state.listeners.len();
        state.listeners.retain(|listener| listener.id != id);
        if state.listeners.len() == before {
            return Err(BusError::UnknownListener(id));
        }
        trace!(%id, "listener unregistered");
        Ok(())
    }

    fn current_generation(&self) -> u32 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn local_node_id(&self) -> NodeId {
        self.shared.local
    }

    fn max_speed(&self) -> Speed {
        self.shared.speed
    }
}
