//! Per-connection subscription handler.
//!
//! A small state machine that validates inbound control messages, polls the
//! shared sensor registry for changes while subscribed, pushes updates
//! through the failure-injecting delivery path, and runs the fault
//! simulation timers that corrupt sensors and eventually kill the
//! connection.
//!
//! Everything the handler does arrives through one command channel, so
//! callbacks never overlap and are processed in arrival order. Timers are
//! small spawned tasks that sleep and post a command; their join handles are
//! the handler's cancellation points.

pub mod delivery;
pub mod faults;

use crate::config::SimulationConfig;
use crate::protocol::{self, ControlAction, OutboundMessage};
use crate::registry::{SensorRecord, SensorRegistry};
use delivery::{DeliveryChannel, Dispatcher, RetryPolicy, jitter};
use faults::FaultSchedule;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Jitter ratio shared by the poll loop and the retry path.
pub const JITTER_RATIO: f64 = 0.2;

/// Subscription status of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Idle,
    Subscribed,
    Terminated,
}

/// Lifecycle notifications delivered to the handler's owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerEvent {
    /// A subscribe was accepted and the poll loop started.
    SubscribedAck,
    /// An inbound message failed validation; the wire reply carries this
    /// text.
    ErrorNotice(String),
    /// The simulated-death timer fired and the connection was closed.
    FatalFault,
}

/// Commands processed by the handler task.
#[derive(Debug)]
enum HandlerCommand {
    Inbound(String),
    PollTick,
    CorruptionTick,
    Death,
    Stop,
}

/// Clonable handle for feeding a running handler.
#[derive(Clone)]
pub struct HandlerHandle {
    tx: mpsc::UnboundedSender<HandlerCommand>,
}

impl HandlerHandle {
    /// Forward one raw inbound payload.
    pub fn message(&self, payload: impl Into<String>) {
        let _ = self.tx.send(HandlerCommand::Inbound(payload.into()));
    }

    /// Request shutdown. Safe to call any number of times, before or after
    /// the handler has already terminated.
    pub fn stop(&self) {
        let _ = self.tx.send(HandlerCommand::Stop);
    }
}

/// State machine for one subscriber connection.
pub struct SubscriptionHandler<C: DeliveryChannel> {
    config: SimulationConfig,
    registry: Arc<SensorRegistry>,
    dispatcher: Dispatcher<C>,
    events: Option<mpsc::UnboundedSender<HandlerEvent>>,
    status: SubscriptionStatus,
    /// Last sensor list successfully queued for the peer; the baseline for
    /// change detection.
    last_snapshot: Vec<SensorRecord>,
    /// Outbound messages not yet flushed, in insertion order.
    pending: VecDeque<OutboundMessage>,
    poll_timer: Option<JoinHandle<()>>,
    corruption_timer: Option<JoinHandle<()>>,
    death_timer: Option<JoinHandle<()>>,
    cmd_tx: mpsc::UnboundedSender<HandlerCommand>,
    cmd_rx: mpsc::UnboundedReceiver<HandlerCommand>,
}

impl<C: DeliveryChannel> SubscriptionHandler<C> {
    pub fn new(config: SimulationConfig, registry: Arc<SensorRegistry>, channel: C) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let retry = RetryPolicy::unbounded(
            Duration::from_millis(config.frequency_ms),
            JITTER_RATIO,
        );
        let dispatcher =
            Dispatcher::new(channel, config.failures_enabled, config.error_prob, retry);
        Self {
            config,
            registry,
            dispatcher,
            events: None,
            status: SubscriptionStatus::Idle,
            last_snapshot: Vec::new(),
            pending: VecDeque::new(),
            poll_timer: None,
            corruption_timer: None,
            death_timer: None,
            cmd_tx,
            cmd_rx,
        }
    }

    /// Register the owner's event channel.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<HandlerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Handle used to feed the running task.
    pub fn handle(&self) -> HandlerHandle {
        HandlerHandle {
            tx: self.cmd_tx.clone(),
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    /// Drive the handler until it is stopped or the simulated death fires.
    pub async fn run(mut self) {
        self.arm_fault_timers();
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                HandlerCommand::Inbound(payload) => self.on_inbound(&payload).await,
                HandlerCommand::PollTick => self.on_poll_tick().await,
                HandlerCommand::CorruptionTick => faults::corrupt_random_sensor(&self.registry),
                HandlerCommand::Death => {
                    self.on_death().await;
                    break;
                }
                HandlerCommand::Stop => {
                    self.shutdown();
                    break;
                }
            }
            if self.status == SubscriptionStatus::Terminated {
                break;
            }
        }
    }

    /// Arm the corruption and death timers when fault simulation is on.
    fn arm_fault_timers(&mut self) {
        let Some(schedule) =
            FaultSchedule::draw(self.config.failures_enabled, self.config.time_to_live_secs)
        else {
            return;
        };
        info!(
            "[Handler] fault simulation armed: corruption every {:.0?}, death after {:.0?}",
            schedule.corruption_period(),
            schedule.death_deadline()
        );

        let tx = self.cmd_tx.clone();
        let period = schedule.corruption_period();
        self.corruption_timer = Some(tokio::spawn(async move {
            loop {
                sleep(period).await;
                if tx.send(HandlerCommand::CorruptionTick).is_err() {
                    break;
                }
            }
        }));

        let tx = self.cmd_tx.clone();
        let deadline = schedule.death_deadline();
        self.death_timer = Some(tokio::spawn(async move {
            sleep(deadline).await;
            let _ = tx.send(HandlerCommand::Death);
        }));
    }

    async fn on_inbound(&mut self, payload: &str) {
        match protocol::validate(payload, &self.registry) {
            Ok(msg) => match msg.action {
                ControlAction::Subscribe => self.on_subscribe(),
                ControlAction::Unsubscribe => self.on_unsubscribe().await,
            },
            Err(err) => {
                let text = err.to_string();
                warn!("[Handler] rejected control message: {text}");
                self.emit(HandlerEvent::ErrorNotice(text.clone()));
                self.respond(OutboundMessage::error(text)).await;
            }
        }
    }

    /// Idle → Subscribed; the first poll is scheduled with zero delay.
    /// Idempotent while already subscribed.
    fn on_subscribe(&mut self) {
        if self.status != SubscriptionStatus::Idle {
            debug!("[Handler] duplicate subscribe ignored");
            return;
        }
        self.status = SubscriptionStatus::Subscribed;
        info!("[Handler] subscribed, starting poll loop");
        self.emit(HandlerEvent::SubscribedAck);
        self.schedule_poll(Duration::ZERO);
    }

    /// Subscribed → Idle; cancels the poll timer, drops anything buffered,
    /// and acknowledges. No-op while idle.
    async fn on_unsubscribe(&mut self) {
        if self.status != SubscriptionStatus::Subscribed {
            debug!("[Handler] unsubscribe while idle ignored");
            return;
        }
        if let Some(handle) = self.poll_timer.take() {
            handle.abort();
        }
        self.pending.clear();
        self.status = SubscriptionStatus::Idle;
        info!("[Handler] unsubscribed, poll loop stopped");
        self.respond(OutboundMessage::ack()).await;
    }

    /// One tick of the polling loop. Ticks that were already queued when the
    /// subscription ended are ignored.
    async fn on_poll_tick(&mut self) {
        if self.status != SubscriptionStatus::Subscribed {
            return;
        }
        let snapshot = self.registry.snapshot();
        if snapshot != self.last_snapshot {
            debug!(
                "[Handler] registry changed, queueing update ({} sensors)",
                snapshot.len()
            );
            self.last_snapshot = snapshot.clone();
            self.pending
                .push_back(OutboundMessage::sensors_list(snapshot));
            self.flush().await;
        }
        if self.status == SubscriptionStatus::Subscribed {
            self.schedule_poll(jitter(
                Duration::from_millis(self.config.frequency_ms),
                JITTER_RATIO,
            ));
        }
    }

    fn schedule_poll(&mut self, delay: Duration) {
        let tx = self.cmd_tx.clone();
        self.poll_timer = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let _ = tx.send(HandlerCommand::PollTick);
        }));
    }

    /// Queue one message and flush.
    async fn respond(&mut self, message: OutboundMessage) {
        self.pending.push_back(message);
        self.flush().await;
    }

    /// Drain the pending buffer in insertion order through the failure
    /// injecting send path. A transport failure terminates the handler.
    async fn flush(&mut self) {
        while let Some(message) = self.pending.pop_front() {
            let payload = match message.to_json() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("[Handler] dropping unencodable message: {err}");
                    continue;
                }
            };
            if let Err(err) = self.dispatcher.dispatch(payload).await {
                warn!("[Handler] delivery failed, terminating connection: {err}");
                self.shutdown();
                return;
            }
        }
    }

    /// The simulated-death timer fired: close this connection and tell the
    /// owner. Scoped to this handler; other connections are unaffected.
    async fn on_death(&mut self) {
        warn!("[Handler] simulated death fired, closing connection");
        self.shutdown();
        self.dispatcher.close().await;
        self.emit(HandlerEvent::FatalFault);
    }

    /// Single exit-cleanup path: cancel every owned timer, drop anything
    /// buffered, and mark the handler terminated. Idempotent.
    fn shutdown(&mut self) {
        for timer in [
            &mut self.poll_timer,
            &mut self.corruption_timer,
            &mut self.death_timer,
        ] {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
        self.pending.clear();
        self.status = SubscriptionStatus::Terminated;
    }

    fn emit(&self, event: HandlerEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
