//! The arbitration loop as a running task.
//!
//! ```text
//! producers ──submit/cancel──┐
//! transport ──feedback───────┤
//!                            ▼
//!                  inbound mpsc ──► Arbiter ──► DeviceCommand ──► dispatcher ──► Transport
//!                                      │                               │
//!                                      ├──► EventBus (lifecycle)       │
//!                                      ├──► tickets (per demand)       │
//!                                      └──► watch (capabilities)       │
//!                                      ▲                               │
//!                                      └──────── dispatch results ◄────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use arbiter::{Demand, Engine, InputDevice};
//!
//! let (handle, task) = Engine::builder(transport).build()?.start();
//!
//! let knob = handle.submit(Demand::input(InputDevice::Knob { min: 0.0, max: 100.0, step: 5.0 }))?;
//! // ...
//! handle.cancel(knob).await?;
//! ```
//!
//! Submission is fire-and-forget: the handle is minted on the caller's side
//! and returned before the loop has looked at the demand. Use
//! [`EngineHandle::submit_tracked`] to follow one demand to its terminal event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::arbiter::{Arbiter, Snapshot, Step};
use crate::bus::EventBus;
use crate::capability::ChannelSet;
use crate::composer::DeviceCommand;
use crate::config::EngineConfig;
use crate::demand::{Demand, DemandHandle};
use crate::error::ArbiterError;
use crate::event::{EventEnvelope, LifecycleEvent};
use crate::feedback::{Feedback, ToolRegistration};
use crate::registry::CancelOutcome;
use crate::state::CapabilityReport;
use crate::transport::{run_dispatcher, DispatchResult, Transport};

/// Sleep target when no one-shot is active; the branch is disabled anyway.
const IDLE_WAKE: Duration = Duration::from_secs(24 * 60 * 60);

enum Inbound {
    Submit {
        handle: DemandHandle,
        demand: Demand,
        ticket: Option<mpsc::UnboundedSender<EventEnvelope>>,
    },
    Cancel {
        handle: DemandHandle,
        reply: oneshot::Sender<CancelOutcome>,
    },
    Feedback(Feedback),
    RegisterTool(ToolRegistration),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

enum Wake {
    Expired,
    Dispatched(DispatchResult),
    Inbound(Option<Inbound>),
}

// =============================================================================
// Builder
// =============================================================================

pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    bus: Option<EventBus>,
}

impl EngineBuilder {
    pub fn new<T: Transport>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            config: EngineConfig::default(),
            bus: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing bus instead of creating one from the config.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<Engine, ArbiterError> {
        self.config.validate()?;

        let arbiter = Arbiter::new(&self.config);
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::with_capacity(self.config.bus_capacity));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(arbiter.report());

        Ok(Engine {
            arbiter,
            bus,
            transport: self.transport,
            inbound_tx,
            inbound_rx,
            status_tx,
            status_rx,
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct Engine {
    arbiter: Arbiter,
    bus: EventBus,
    transport: Arc<dyn Transport>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    status_tx: watch::Sender<CapabilityReport>,
    status_rx: watch::Receiver<CapabilityReport>,
}

impl Engine {
    pub fn builder<T: Transport>(transport: T) -> EngineBuilder {
        EngineBuilder::new(transport)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// A handle usable before the loop starts; messages wait in the inbound queue.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            inbound: self.inbound_tx.clone(),
            bus: self.bus.clone(),
            status: self.status_rx.clone(),
        }
    }

    /// Spawn the loop. It runs until every handle is dropped, `shutdown` is
    /// called, or an invariant breaks.
    pub fn start(self) -> (EngineHandle, JoinHandle<Result<(), ArbiterError>>) {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        (handle, task)
    }

    pub async fn run(self) -> Result<(), ArbiterError> {
        let Engine {
            mut arbiter,
            bus,
            transport,
            inbound_tx,
            mut inbound_rx,
            status_tx,
            ..
        } = self;
        // Only handles keep the loop alive.
        drop(inbound_tx);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(run_dispatcher(transport, command_rx, result_tx));

        let mut outbox = Outbox {
            bus,
            status: status_tx,
            commands: command_tx,
            tickets: HashMap::new(),
            seq: 0,
        };

        let report = arbiter.report();
        info!(
            model = ?report.model,
            channels = %report.channels,
            state = %report.state,
            "arbitration loop starting"
        );

        let outcome = loop {
            let deadline = arbiter.next_deadline();
            let wake = tokio::select! {
                biased;
                _ = sleep_until(deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKE)),
                    if deadline.is_some() => Wake::Expired,
                Some(result) = result_rx.recv() => Wake::Dispatched(result),
                message = inbound_rx.recv() => Wake::Inbound(message),
            };

            let now = Instant::now();
            let mut cancel_reply = None;
            let step = match wake {
                Wake::Expired => arbiter.expire(now),
                Wake::Dispatched(DispatchResult { revision, result }) => {
                    arbiter.dispatch_result(revision, result, now)
                }
                Wake::Inbound(None) => {
                    info!("all engine handles dropped");
                    break Ok(());
                }
                Wake::Inbound(Some(message)) => match message {
                    Inbound::Shutdown => {
                        info!("shutdown requested");
                        break Ok(());
                    }
                    Inbound::Submit {
                        handle,
                        demand,
                        ticket,
                    } => {
                        if let Some(ticket) = ticket {
                            outbox.tickets.insert(handle, ticket);
                        }
                        arbiter.submit(handle, demand, now)
                    }
                    Inbound::Cancel { handle, reply } => {
                        arbiter.cancel(handle, now).map(|(outcome, step)| {
                            debug!(%handle, ?outcome, "cancel processed");
                            cancel_reply = Some((reply, outcome));
                            step
                        })
                    }
                    Inbound::Feedback(feedback) => arbiter.feedback(feedback, now),
                    Inbound::RegisterTool(tool) => {
                        arbiter.register_tool(tool.name, tool.channels, now)
                    }
                    Inbound::Snapshot(reply) => {
                        let _ = reply.send(arbiter.snapshot());
                        Ok(Step::default())
                    }
                },
            };

            match step {
                Ok(step) => {
                    outbox.publish(step, arbiter.report());
                    // Reply after publishing so the caller sees the freed capacity.
                    if let Some((reply, outcome)) = cancel_reply {
                        let _ = reply.send(outcome);
                    }
                }
                Err(err) => {
                    error!(error = %err, "arbitration loop halting");
                    break Err(err);
                }
            }
        };

        if outcome.is_ok() {
            match arbiter.shutdown(Instant::now()) {
                Ok(step) => outbox.publish(step, arbiter.report()),
                Err(err) => warn!(error = %err, "shutdown left the loop inconsistent"),
            }
        }

        // Closing the command channel stops the dispatcher.
        drop(outbox);
        if let Err(e) = dispatcher.await {
            warn!(error = %e, "dispatcher task ended abnormally");
        }
        info!("arbitration loop stopped");
        outcome
    }
}

/// Everything the loop sends out after a step.
struct Outbox {
    bus: EventBus,
    status: watch::Sender<CapabilityReport>,
    commands: mpsc::UnboundedSender<DeviceCommand>,
    tickets: HashMap<DemandHandle, mpsc::UnboundedSender<EventEnvelope>>,
    seq: u64,
}

impl Outbox {
    fn publish(&mut self, step: Step, report: CapabilityReport) {
        let at = Utc::now();
        for event in step.events {
            self.seq += 1;
            let envelope = EventEnvelope {
                seq: self.seq,
                at,
                event,
            };

            if let Some(handle) = envelope.event.handle() {
                if let Some(ticket) = self.tickets.get(&handle) {
                    let _ = ticket.send(envelope.clone());
                }
                if envelope.event.is_terminal() {
                    self.tickets.remove(&handle);
                }
            }
            self.bus.emit(envelope);
        }

        if let Some(command) = step.command {
            debug!(revision = command.revision, mode = ?command.mode, "dispatching device command");
            if self.commands.send(command).is_err() {
                warn!("dispatcher is gone, device command dropped");
            }
        }

        self.status.send_if_modified(|current| {
            if *current == report {
                false
            } else {
                *current = report;
                true
            }
        });
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running loop.
#[derive(Clone)]
pub struct EngineHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    bus: EventBus,
    status: watch::Receiver<CapabilityReport>,
}

impl EngineHandle {
    /// Submit a demand. Returns its handle immediately.
    pub fn submit(&self, demand: Demand) -> Result<DemandHandle, ArbiterError> {
        let handle = DemandHandle::new();
        self.send(Inbound::Submit {
            handle,
            demand,
            ticket: None,
        })?;
        Ok(handle)
    }

    /// Submit a demand and get a ticket carrying its own lifecycle events.
    pub fn submit_tracked(&self, demand: Demand) -> Result<Ticket, ArbiterError> {
        let handle = DemandHandle::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(Inbound::Submit {
            handle,
            demand,
            ticket: Some(tx),
        })?;
        Ok(Ticket { handle, events: rx })
    }

    /// Cancel an active or queued demand. Idempotent.
    pub async fn cancel(&self, handle: DemandHandle) -> Result<CancelOutcome, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Inbound::Cancel { handle, reply })?;
        rx.await.map_err(|_| ArbiterError::EngineStopped)
    }

    pub fn feedback(&self, feedback: Feedback) -> Result<(), ArbiterError> {
        self.send(Inbound::Feedback(feedback))
    }

    /// Make a runtime tool known to the capability model.
    pub fn register_tool(
        &self,
        name: impl Into<String>,
        channels: ChannelSet,
    ) -> Result<(), ArbiterError> {
        self.send(Inbound::RegisterTool(ToolRegistration {
            name: name.into(),
            channels,
        }))
    }

    /// Lifecycle events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Latest published capability report. Does not wait for the loop.
    pub fn capabilities(&self) -> CapabilityReport {
        self.status.borrow().clone()
    }

    /// Receiver that wakes whenever the capability report changes.
    pub fn watch_capabilities(&self) -> watch::Receiver<CapabilityReport> {
        self.status.clone()
    }

    /// Full copy of the loop's state, taken between steps.
    pub async fn snapshot(&self) -> Result<Snapshot, ArbiterError> {
        let (reply, rx) = oneshot::channel();
        self.send(Inbound::Snapshot(reply))?;
        rx.await.map_err(|_| ArbiterError::EngineStopped)
    }

    /// Ask the loop to stop after the messages already queued.
    pub fn shutdown(&self) {
        let _ = self.inbound.send(Inbound::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.inbound.is_closed()
    }

    fn send(&self, message: Inbound) -> Result<(), ArbiterError> {
        self.inbound
            .send(message)
            .map_err(|_| ArbiterError::EngineStopped)
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Per-demand event stream returned by [`EngineHandle::submit_tracked`].
///
/// Closes after the demand's terminal event.
#[derive(Debug)]
pub struct Ticket {
    handle: DemandHandle,
    events: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl Ticket {
    pub fn handle(&self) -> DemandHandle {
        self.handle
    }

    /// Next event for this demand; `None` once the terminal event was read.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        self.events.recv().await
    }

    /// Wait for the terminal event, skipping everything before it.
    pub async fn outcome(mut self) -> Result<LifecycleEvent, ArbiterError> {
        while let Some(envelope) = self.events.recv().await {
            if envelope.event.is_terminal() {
                return Ok(envelope.event);
            }
        }
        Err(ArbiterError::EngineStopped)
    }
}
