//! Per-bus AV/C command server.
//!
//! The FCP response register is bus-global, so at most one command may be
//! outstanding per bus. Clients submit commands through a [`ServerHandle`];
//! a single worker task services them in submission order, owning the
//! response listener for the duration of each command.

use std::sync::Arc;

use fcp::{build_write, FcpFrame, NodeId, Packet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{AddressRange, Bus, InboundRequest, RCode};
use crate::config::{BusyBudget, ServerConfig};
use crate::correlator::{Correlator, Disposition, ResponseFrame};
use crate::transaction::{Outcome, TransactionExecutor};
use crate::{consts, ProtocolError};

/// One AV/C command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub node: NodeId,
    pub frame: FcpFrame,
    /// Protocol retries; the server default when unset.
    pub max_retries: Option<u32>,
    /// Generation `node` was resolved in; the generation current when the
    /// server starts the command when unset.
    pub generation: Option<u32>,
}

impl CommandRequest {
    pub fn new(node: NodeId, frame: FcpFrame) -> Self {
        Self {
            node,
            frame,
            max_retries: None,
            generation: None,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }
}

type Reply = oneshot::Sender<Result<ResponseFrame, ProtocolError>>;

struct Job {
    request: CommandRequest,
    reply: Reply,
}

/// Cloneable client side of a [`CommandServer`].
#[derive(Clone)]
pub struct ServerHandle {
    jobs: mpsc::Sender<Job>,
    cancel: CancellationToken,
}

impl ServerHandle {
    /// Execute a command and wait for its correlated response.
    ///
    /// Dropping the returned future before the server started the command
    /// removes it from the queue; once started, the command runs to completion
    /// and only the reply is discarded.
    pub async fn execute(&self, request: CommandRequest) -> Result<ResponseFrame, ProtocolError> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::ServerShuttingDown);
        }
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(Job { request, reply })
            .await
            .map_err(|_| ProtocolError::ServerShuttingDown)?;
        rx.await.map_err(|_| ProtocolError::ServerShuttingDown)?
    }

    /// Ask the server to stop; queued and in-flight commands fail with
    /// [`ProtocolError::ServerShuttingDown`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.jobs.is_closed()
    }
}

/// Owner of the worker task serving one bus.
pub struct CommandServer {
    handle: ServerHandle,
    task: JoinHandle<()>,
}

impl CommandServer {
    /// Spawn the worker for `bus` on the current tokio runtime.
    pub fn spawn(bus: Arc<dyn Bus>, config: ServerConfig) -> Self {
        let (jobs, rx) = mpsc::channel(config.queue_depth.max(1));
        let cancel = CancellationToken::new();
        let worker = Worker {
            executor: TransactionExecutor::new(bus.clone(), config.ack_timeout),
            bus,
            config,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(rx));
        Self {
            handle: ServerHandle { jobs, cancel },
            task,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Stop the worker and wait until every pending caller has been answered.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        if let Err(err) = self.task.await {
            error!(%err, "command server task failed");
        }
    }
}

/// Result of waiting for the response to one transmission.
enum Wait {
    Resolved(ResponseFrame),
    Resend(ProtocolError),
}

struct Worker {
    bus: Arc<dyn Bus>,
    executor: TransactionExecutor,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut jobs: mpsc::Receiver<Job>) {
        info!(local = %self.bus.local_node_id(), "command server started");
        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            if job.reply.is_closed() {
                debug!(node = %job.request.node, "skipping cancelled command");
                continue;
            }
            let result = self.service(&job.request).await;
            if job.reply.send(result).is_err() {
                debug!(node = %job.request.node, "caller went away before the reply");
            }
        }

        jobs.close();
        let mut drained = 0usize;
        while let Ok(job) = jobs.try_recv() {
            let _ = job.reply.send(Err(ProtocolError::ServerShuttingDown));
            drained += 1;
        }
        info!(drained, "command server stopped");
    }

    /// Execute one command with the response listener registered.
    async fn service(&self, request: &CommandRequest) -> Result<ResponseFrame, ProtocolError> {
        let (sink, mut inbound) = mpsc::unbounded_channel();
        let listener = self
            .bus
            .register_listener(AddressRange::fcp_response(), sink)
            .await
            .map_err(|err| {
                error!(%err, "unable to register the FCP response listener");
                ProtocolError::SystemResource(err.to_string())
            })?;

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProtocolError::ServerShuttingDown),
            result = self.attempts(request, &mut inbound) => result,
        };

        if let Err(err) = self.bus.unregister_listener(listener).await {
            warn!(%err, %listener, "unable to unregister the FCP response listener");
        }
        inbound.close();
        while let Ok(leftover) = inbound.try_recv() {
            trace!(source = %leftover.source(), "answering leftover response frame");
            leftover.respond(RCode::AddressError);
        }
        result
    }

    async fn attempts(
        &self,
        request: &CommandRequest,
        inbound: &mut mpsc::UnboundedReceiver<InboundRequest>,
    ) -> Result<ResponseFrame, ProtocolError> {
        let node = request.node;
        let max_retries = request.max_retries.unwrap_or(self.config.max_retries);
        let generation = request
            .generation
            .unwrap_or_else(|| self.bus.current_generation());
        let speed = self.config.speed.unwrap_or_else(|| self.bus.max_speed());
        let packet = build_write(speed, consts::FCP_COMMAND_ADDR, request.frame.words());
        let mut correlator = Correlator::new();
        let mut last = ProtocolError::TransportTimeout;

        debug!(node = %node, generation, max_retries, frame = %request.frame, "executing command");
        for attempt in 0..=max_retries {
            if attempt > 0 && matches!(last, ProtocolError::TransportBusy(_)) {
                time::sleep(self.config.busy_delay).await;
            }
            if let Some(cause) = self.transmit(node, generation, &packet, attempt).await? {
                warn!(node = %node, attempt, %cause, "transmission failed");
                last = cause;
                continue;
            }

            correlator.arm(&request.frame);
            match self.await_response(&mut correlator, inbound, node, attempt).await? {
                Wait::Resolved(response) => {
                    debug!(node = %node, attempt, frame = %response.frame, "command resolved");
                    return Ok(response);
                }
                Wait::Resend(cause) => {
                    warn!(node = %node, attempt, %cause, "no final response, re-sending");
                    last = cause;
                }
            }
        }

        correlator.disarm();
        let attempts = max_retries.saturating_add(1);
        error!(node = %node, attempts, %last, "retry exceeded");
        Err(ProtocolError::RetryExceeded {
            attempts,
            last: Box::new(last),
        })
    }

    /// Transmit the command once, absorbing busy re-sends allowed by a
    /// separate busy budget. `Ok(Some(cause))` consumes a protocol attempt.
    async fn transmit(
        &self,
        node: NodeId,
        generation: u32,
        packet: &Packet,
        attempt: u32,
    ) -> Result<Option<ProtocolError>, ProtocolError> {
        let mut busy_resends = 0u32;
        loop {
            let outcome = self.executor.execute(node, generation, packet).await?;
            trace!(node = %node, attempt, ?outcome, "transmission outcome");
            match outcome {
                Outcome::Complete | Outcome::Pending => return Ok(None),
                Outcome::BusyRetry(ack) => {
                    if let BusyBudget::Separate(limit) = self.config.busy_budget {
                        if busy_resends < limit {
                            busy_resends += 1;
                            debug!(node = %node, attempt, busy_resends, ?ack, "target busy, re-sending");
                            time::sleep(self.config.busy_delay).await;
                            continue;
                        }
                    }
                    return Ok(Some(ProtocolError::TransportBusy(ack)));
                }
                Outcome::Missing => return Ok(Some(ProtocolError::TransportMissing)),
                Outcome::Timeout => return Ok(Some(ProtocolError::TransportTimeout)),
                Outcome::GenerationMismatch { expected, current } => {
                    warn!(node = %node, expected, current, "bus reset during command");
                    return Err(ProtocolError::GenerationChanged { expected, current });
                }
                Outcome::Rejected(ack) => return Err(ProtocolError::Rejected(ack)),
            }
        }
    }

    /// Feed inbound frames to the correlator until it resolves, asks for a
    /// re-send, or the split timeout elapses.
    ///
    /// The first interim response moves the deadline to the interim timeout;
    /// later ones are acknowledged without extending it again.
    async fn await_response(
        &self,
        correlator: &mut Correlator,
        inbound: &mut mpsc::UnboundedReceiver<InboundRequest>,
        node: NodeId,
        attempt: u32,
    ) -> Result<Wait, ProtocolError> {
        let mut deadline = Instant::now() + self.config.split_timeout;
        let mut extended = false;
        let mut last = ProtocolError::TransportTimeout;
        loop {
            let request = tokio::select! {
                request = inbound.recv() => request,
                _ = time::sleep_until(deadline) => return Ok(Wait::Resend(last)),
            };
            let Some(request) = request else {
                return Err(ProtocolError::SystemResource(
                    "FCP response listener closed by the bus".into(),
                ));
            };
            let source = request.source();
            match correlator.offer(source, request.packet()) {
                Disposition::Stray => {
                    debug!(node = %node, source = %source, attempt, "uncorrelated response frame");
                    request.respond(RCode::AddressError);
                }
                Disposition::UnsupportedTcode(tcode) => {
                    error!(source = %source, tcode, "FCP response frame with unexpected transaction code");
                    request.respond(RCode::TypeError);
                    last = ProtocolError::ProtocolTypeError { tcode };
                }
                Disposition::Interim => {
                    request.respond(RCode::Complete);
                    if extended {
                        debug!(node = %node, source = %source, attempt, "repeated interim response");
                    } else {
                        debug!(node = %node, source = %source, attempt, "interim response");
                        deadline = Instant::now() + self.config.interim_timeout;
                        extended = true;
                    }
                }
                Disposition::NotReady => {
                    request.respond(RCode::Complete);
                    return Ok(Wait::Resend(ProtocolError::ResponseNotReady));
                }
                Disposition::Resolved(response) => {
                    request.respond(RCode::Complete);
                    return Ok(Wait::Resolved(response));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::bus::AckCode;
    use crate::sim::{SimBus, SimReaction};
    use fcp::avc::{vcr, AvcCtype, TAPE_SUBUNIT_0};
    use fcp::{build_read_quadlet, Speed, FCP_RESPONSE_ADDR};

    const DECK: NodeId = NodeId::local(1);
    const STRAY: NodeId = NodeId::local(7);

    fn play() -> FcpFrame {
        FcpFrame::command(AvcCtype::Control, TAPE_SUBUNIT_0, vcr::PLAY, vcr::PLAY_FORWARD)
    }

    fn accepted(command: &FcpFrame) -> FcpFrame {
        FcpFrame::from_words(vec![0x0900_0000 | (command.first() & 0x00ff_ffff)])
    }

    fn spawn(bus: &SimBus) -> CommandServer {
        CommandServer::spawn(Arc::new(bus.clone()), ServerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_command_resolves() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| SimReaction::respond(accepted(frame)));
        let server = spawn(&bus);
        let response = server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response");
        assert_eq!(response.source, DECK);
        assert_eq!(response.frame.words(), &[0x0920_c375]);
        assert_eq!(bus.sent().len(), 1);
        assert_eq!(bus.listener_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_target_is_retried_then_exceeded() {
        let bus = SimBus::new();
        bus.add_device(DECK, |_: &FcpFrame| SimReaction::ack(AckCode::Complete));
        let server = spawn(&bus);
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()).with_retries(3))
            .await
            .expect_err("no response");
        assert_eq!(
            err,
            ProtocolError::RetryExceeded {
                attempts: 4,
                last: Box::new(ProtocolError::TransportTimeout),
            }
        );
        assert_eq!(bus.sent().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_acks_share_the_retry_budget() {
        let bus = SimBus::new();
        bus.add_device(DECK, |_: &FcpFrame| SimReaction::ack(AckCode::BusyA));
        let server = spawn(&bus);
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect_err("busy");
        assert_eq!(
            err,
            ProtocolError::RetryExceeded {
                attempts: 3,
                last: Box::new(ProtocolError::TransportBusy(AckCode::BusyA)),
            }
        );
        let sent = bus.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|packet| packet.wire == sent[0].wire));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_busy_budget_does_not_consume_attempts() {
        let bus = SimBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        bus.add_device(DECK, move |frame: &FcpFrame| {
            if seen.fetch_add(1, Ordering::SeqCst) < 4 {
                SimReaction::ack(AckCode::BusyX)
            } else {
                SimReaction::respond(accepted(frame))
            }
        });
        let config = ServerConfig {
            max_retries: 0,
            busy_budget: BusyBudget::Separate(4),
            ..ServerConfig::default()
        };
        let server = CommandServer::spawn(Arc::new(bus.clone()), config);
        server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response after busy re-sends");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn stray_frames_never_resolve() {
        let bus = SimBus::new();
        let stray = bus.clone();
        bus.add_device(DECK, move |_: &FcpFrame| {
            stray.inject_response(STRAY, &FcpFrame::from_words(vec![0x0920_c475]), Duration::ZERO);
            SimReaction::ack(AckCode::Complete)
        });
        let server = spawn(&bus);
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()).with_retries(1))
            .await
            .expect_err("only strays arrive");
        assert!(matches!(err, ProtocolError::RetryExceeded { attempts: 2, .. }));
        let completions = bus.completions();
        assert_eq!(completions.len(), 2);
        assert!(completions
            .iter()
            .all(|c| c.source == STRAY && c.rcode == RCode::AddressError));
    }

    #[tokio::test(start_paused = true)]
    async fn stray_then_real_response() {
        let bus = SimBus::new();
        let stray = bus.clone();
        bus.add_device(DECK, move |frame: &FcpFrame| {
            stray.inject_response(STRAY, &FcpFrame::from_words(vec![0x0928_c375]), Duration::ZERO);
            SimReaction::ack(AckCode::Complete)
                .with_delayed_response(accepted(frame), Duration::from_millis(10))
        });
        let server = spawn(&bus);
        let response = server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response");
        assert_eq!(response.source, DECK);
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_response_code_resends_identical_frame() {
        let bus = SimBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        bus.add_device(DECK, move |frame: &FcpFrame| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                SimReaction::respond(FcpFrame::from_words(vec![frame.first() & 0x00ff_ffff]))
            } else {
                SimReaction::respond(accepted(frame))
            }
        });
        let server = spawn(&bus);
        server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response");
        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].wire, sent[1].wire);
    }

    #[tokio::test(start_paused = true)]
    async fn generation_change_fails_fast() {
        let bus = SimBus::new();
        bus.add_device(DECK, |_: &FcpFrame| SimReaction::ack(AckCode::Complete).with_bus_reset());
        let server = spawn(&bus);
        let generation = bus.current_generation();
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()).with_retries(5))
            .await
            .expect_err("bus reset");
        assert_eq!(
            err,
            ProtocolError::GenerationChanged {
                expected: generation,
                current: generation + 1
            }
        );
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_ack_is_not_retried() {
        let bus = SimBus::new();
        bus.add_device(DECK, |_: &FcpFrame| SimReaction::ack(AckCode::DataError));
        let server = spawn(&bus);
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect_err("rejected");
        assert_eq!(err, ProtocolError::Rejected(AckCode::DataError));
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_node_exceeds_retries() {
        let bus = SimBus::new();
        let server = spawn(&bus);
        let err = server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect_err("missing");
        assert_eq!(
            err,
            ProtocolError::RetryExceeded {
                attempts: 3,
                last: Box::new(ProtocolError::TransportMissing),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn type_error_frames_are_answered_and_ignored() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            SimReaction::ack(AckCode::Complete)
                .with_packet(build_read_quadlet(Speed::S400, FCP_RESPONSE_ADDR), Duration::ZERO)
                .with_delayed_response(accepted(frame), Duration::from_millis(5))
        });
        let server = spawn(&bus);
        server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response");
        time::sleep(Duration::from_millis(1)).await;
        let rcodes: Vec<RCode> = bus.completions().iter().map(|c| c.rcode).collect();
        assert_eq!(rcodes, vec![RCode::TypeError, RCode::Complete]);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_waits_past_interim() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            let interim = FcpFrame::from_words(vec![0x0f00_0000 | (frame.first() & 0x00ff_ffff)]);
            let changed = FcpFrame::from_words(vec![0x0d20_c375]);
            SimReaction::respond(interim).with_delayed_response(changed, Duration::from_secs(2))
        });
        let server = spawn(&bus);
        let notify = FcpFrame::command(
            AvcCtype::Notify,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        let response = server
            .handle()
            .execute(CommandRequest::new(DECK, notify))
            .await
            .expect("final response");
        assert_eq!(response.frame.words(), &[0x0d20_c375]);
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_interims_extend_the_wait_once() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| match frame.ctype() {
            AvcCtype::Notify => SimReaction::ack(AckCode::Complete),
            _ => SimReaction::respond(accepted(frame)),
        });
        let notify = FcpFrame::command(
            AvcCtype::Notify,
            TAPE_SUBUNIT_0,
            vcr::TRANSPORT_STATE,
            vcr::TRANSPORT_STATE_INQUIRY,
        );
        let interim = FcpFrame::from_words(vec![0x0f00_0000 | (notify.first() & 0x00ff_ffff)]);
        for k in 0..20u64 {
            bus.inject_response(STRAY, &interim, Duration::from_millis(50 + k * 9_000));
        }
        let server = spawn(&bus);
        let handle = server.handle();

        let started = Instant::now();
        let err = handle
            .execute(CommandRequest::new(DECK, notify))
            .await
            .expect_err("no final response");
        assert_eq!(
            err,
            ProtocolError::RetryExceeded {
                attempts: 3,
                last: Box::new(ProtocolError::TransportTimeout),
            }
        );
        let elapsed = started.elapsed();
        assert!(
            elapsed < consts::INTERIM_TIMEOUT + Duration::from_secs(1),
            "worker held for {elapsed:?}"
        );
        assert_eq!(bus.sent().len(), 3);

        let response = handle
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("next command");
        assert_eq!(response.frame.words(), &[0x0920_c375]);
        server.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_in_flight_command_still_drains_its_response() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            SimReaction::ack(AckCode::Complete)
                .with_delayed_response(accepted(frame), Duration::from_millis(30))
        });
        let server = spawn(&bus);
        let handle = server.handle();

        let abandoned = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.execute(CommandRequest::new(DECK, play())).await })
        };
        time::sleep(Duration::from_millis(5)).await;
        assert_eq!(bus.sent().len(), 1);
        abandoned.abort();

        let stop = FcpFrame::command(AvcCtype::Control, TAPE_SUBUNIT_0, vcr::WIND, vcr::WIND_STOP);
        let response = handle
            .execute(CommandRequest::new(DECK, stop))
            .await
            .expect("next command");
        assert_eq!(response.frame.words(), &[0x0920_c460]);

        let completions = bus.completions();
        assert_eq!(completions.len(), 2);
        assert!(completions
            .iter()
            .all(|c| c.source == DECK && c.rcode == RCode::Complete));
        assert_eq!(bus.sent().len(), 2);
        assert_eq!(bus.listener_count(), 0);
        server.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn commands_are_serviced_in_order() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            SimReaction::ack(AckCode::Complete)
                .with_delayed_response(accepted(frame), Duration::from_millis(30))
        });
        let server = spawn(&bus);
        let handle = server.handle();
        let operands = [vcr::PLAY_FORWARD, vcr::PLAY_REVERSE, vcr::PLAY_FORWARD_PAUSE];
        let mut tasks = Vec::new();
        for operand in operands {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let frame = FcpFrame::command(AvcCtype::Control, TAPE_SUBUNIT_0, vcr::PLAY, operand);
                handle.execute(CommandRequest::new(DECK, frame)).await
            }));
            tokio::task::yield_now().await;
        }
        for (task, operand) in tasks.into_iter().zip(operands) {
            let response = task.await.expect("join").expect("response");
            assert_eq!(response.frame.operand(0), Some(operand));
        }
        let sent: Vec<u32> = bus
            .sent()
            .iter()
            .map(|packet| packet.packet.quadlet().expect("quadlet write"))
            .collect();
        assert_eq!(sent, vec![0x0020_c375, 0x0020_c365, 0x0020_c37d]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_queued_command_is_skipped() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            SimReaction::ack(AckCode::Complete)
                .with_delayed_response(accepted(frame), Duration::from_millis(30))
        });
        let server = spawn(&bus);
        let handle = server.handle();

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.execute(CommandRequest::new(DECK, play())).await })
        };
        tokio::task::yield_now().await;
        let queued = {
            let handle = handle.clone();
            let frame = FcpFrame::command(AvcCtype::Control, TAPE_SUBUNIT_0, vcr::WIND, vcr::WIND_STOP);
            tokio::spawn(async move { handle.execute(CommandRequest::new(DECK, frame)).await })
        };
        tokio::task::yield_now().await;
        queued.abort();

        first.await.expect("join").expect("first response");
        let after = handle
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("later response");
        assert_eq!(after.frame.opcode(), vcr::PLAY);
        assert!(bus
            .sent()
            .iter()
            .all(|packet| packet.packet.quadlet() != Some(0x0020_c460)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fails_in_flight_and_queued_commands() {
        let bus = SimBus::new();
        bus.add_device(DECK, |_: &FcpFrame| SimReaction::ack(AckCode::Complete));
        let config = ServerConfig {
            split_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        };
        let server = CommandServer::spawn(Arc::new(bus.clone()), config);
        let handle = server.handle();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.execute(CommandRequest::new(DECK, play())).await
            }));
            tokio::task::yield_now().await;
        }
        time::sleep(Duration::from_millis(10)).await;
        server.shutdown().await;
        for task in tasks {
            assert_eq!(
                task.await.expect("join"),
                Err(ProtocolError::ServerShuttingDown)
            );
        }
        assert_eq!(bus.listener_count(), 0);
        assert!(!handle.is_running());
        assert_eq!(
            handle.execute(CommandRequest::new(DECK, play())).await,
            Err(ProtocolError::ServerShuttingDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_frames_are_drained_with_address_error() {
        let bus = SimBus::new();
        bus.add_device(DECK, |frame: &FcpFrame| {
            SimReaction::respond(accepted(frame)).with_response(accepted(frame))
        });
        let server = spawn(&bus);
        server
            .handle()
            .execute(CommandRequest::new(DECK, play()))
            .await
            .expect("response");
        time::sleep(Duration::from_millis(1)).await;
        let rcodes: Vec<RCode> = bus.completions().iter().map(|c| c.rcode).collect();
        assert_eq!(rcodes.len(), 2);
        assert_eq!(rcodes[0], RCode::Complete);
        assert_eq!(rcodes[1], RCode::AddressError);
    }
}
