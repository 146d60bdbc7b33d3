//! The arbitration core.
//!
//! [`Arbiter`] owns the active set, the wait queue, the stream registry and
//! the device snapshot. Every operation is one step: it runs to completion,
//! re-evaluates the queue, checks invariants and returns the lifecycle events
//! plus the composed device command if the output changed.
//!
//! The async engine wraps this in a single task; tests drive it directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::active::{ActiveEntry, ActiveSet};
use crate::capability::{ChannelSet, DeviceModel};
use crate::composer::{compose, DeviceCommand};
use crate::config::EngineConfig;
use crate::demand::{Demand, DemandHandle, DemandKind, Payload};
use crate::error::ArbiterError;
use crate::event::{LifecycleEvent, Outcome};
use crate::expression::Notification;
use crate::feedback::{Feedback, InputState, SensorEvent};
use crate::guard::{PowerGuard, Verdict};
use crate::queue::{QueuedEntry, WaitQueue};
use crate::registry::{CancelOutcome, StreamRegistry};
use crate::resolver::{self, Decision, QueueReason, RejectReason};
use crate::state::{CapabilityReport, Connection, DeviceState, LoopState};

/// Upper bound on admissions during one queue re-evaluation. Each admission
/// either shrinks the queue or evicts a strictly lower priority demand, so a
/// healthy loop settles long before this.
const MAX_REEVALUATION_PASSES: usize = 1024;

/// Point-in-time view of an active demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSummary {
    pub handle: DemandHandle,
    pub kind: DemandKind,
    pub priority: i32,
    pub channels: ChannelSet,
    pub exclusive: bool,
    pub continuous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedSummary {
    pub handle: DemandHandle,
    pub kind: DemandKind,
    pub priority: i32,
    pub reason: QueueReason,
}

/// Everything the loop owns, copied out for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: LoopState,
    pub device: DeviceState,
    pub revision: u64,
    pub active: Vec<ActiveSummary>,
    pub queued: Vec<QueuedSummary>,
    /// Registered continuous demands in submission order.
    pub streams: Vec<DemandHandle>,
}

/// Result of one step.
#[derive(Debug, Default)]
pub struct Step {
    pub events: Vec<LifecycleEvent>,
    /// Present only when the composed output changed.
    pub command: Option<DeviceCommand>,
}

pub struct Arbiter {
    active: ActiveSet,
    queue: WaitQueue,
    streams: StreamRegistry,
    device: DeviceState,
    guard: PowerGuard,
    battery_notices: bool,
    dispatch_retries: u32,
    retries_left: u32,
    state: LoopState,
    next_seq: u64,
    revision: u64,
    last_command: Option<DeviceCommand>,
    inputs: HashMap<DemandHandle, InputState>,
    events: Vec<LifecycleEvent>,
}

impl Arbiter {
    pub fn new(config: &EngineConfig) -> Self {
        let device = config.device_state();
        let state = LoopState::derive(&device, 0);
        Self {
            active: ActiveSet::new(),
            queue: WaitQueue::new(),
            streams: StreamRegistry::new(),
            device,
            guard: config.power_guard(),
            battery_notices: config.battery_notices,
            dispatch_retries: config.dispatch_retries,
            retries_left: config.dispatch_retries,
            state,
            next_seq: 0,
            revision: 0,
            last_command: None,
            inputs: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn active(&self) -> &ActiveSet {
        &self.active
    }

    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Revision of the last composed command.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn report(&self) -> CapabilityReport {
        CapabilityReport::new(&self.device, self.state, self.active.len(), self.queue.len())
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            device: self.device.clone(),
            revision: self.revision,
            active: self
                .active
                .iter()
                .map(|e| ActiveSummary {
                    handle: e.handle,
                    kind: e.demand.kind,
                    priority: e.demand.priority,
                    channels: e.channels,
                    exclusive: e.demand.is_exclusive(),
                    continuous: e.demand.is_continuous(),
                })
                .collect(),
            queued: self
                .queue
                .iter()
                .map(|e| QueuedSummary {
                    handle: e.handle,
                    kind: e.demand.kind,
                    priority: e.demand.priority,
                    reason: e.reason.clone(),
                })
                .collect(),
            streams: self.streams.list_active(),
        }
    }

    /// Earliest one-shot expiry in the active set.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.next_deadline()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    pub fn submit(
        &mut self,
        handle: DemandHandle,
        demand: Demand,
        now: Instant,
    ) -> Result<Step, ArbiterError> {
        self.accept(handle, demand, now);
        self.finish(now)
    }

    /// Cancel an active or queued demand. Unknown and already finished
    /// handles report `NotFound` without touching anything.
    pub fn cancel(
        &mut self,
        handle: DemandHandle,
        now: Instant,
    ) -> Result<(CancelOutcome, Step), ArbiterError> {
        self.streams.cancel(&handle);
        let found = self.active.remove(&handle).is_some() || self.queue.remove(&handle).is_some();
        if !found {
            debug!(%handle, "cancel for unknown or finished demand");
            return Ok((CancelOutcome::NotFound, Step::default()));
        }

        info!(%handle, "demand cancelled");
        self.inputs.remove(&handle);
        self.emit(LifecycleEvent::Cancelled { handle });
        Ok((CancelOutcome::Ok, self.finish(now)?))
    }

    /// Complete every one-shot demand whose span has elapsed.
    pub fn expire(&mut self, now: Instant) -> Result<Step, ArbiterError> {
        for handle in self.active.expired(now) {
            if self.active.remove(&handle).is_some() {
                debug!(%handle, "one-shot demand finished");
                self.inputs.remove(&handle);
                self.emit(LifecycleEvent::Completed {
                    handle,
                    outcome: Outcome::Finished,
                });
            }
        }
        self.finish(now)
    }

    pub fn feedback(&mut self, feedback: Feedback, now: Instant) -> Result<Step, ArbiterError> {
        match feedback {
            Feedback::Battery { level } => self.on_battery(level.min(100), now),
            Feedback::Connected { model } => self.on_connected(model),
            Feedback::Disconnected => self.on_disconnected(),
            Feedback::Capabilities { model } => self.on_capabilities(model),
            Feedback::Sensor(sample) => self.on_sensor(sample),
        }
        self.finish(now)
    }

    /// Add or replace a runtime tool in the capability model.
    pub fn register_tool(
        &mut self,
        name: String,
        channels: ChannelSet,
        now: Instant,
    ) -> Result<Step, ArbiterError> {
        info!(tool = %name, %channels, "tool registered");
        self.device.capabilities.register_tool(name, channels);
        self.drop_unsupported();
        self.finish(now)
    }

    /// Record the transport's answer for a dispatched command.
    pub fn dispatch_result(
        &mut self,
        revision: u64,
        result: Result<(), String>,
        now: Instant,
    ) -> Result<Step, ArbiterError> {
        match result {
            Ok(()) => {
                if revision == self.revision {
                    self.retries_left = self.dispatch_retries;
                }
                Ok(Step::default())
            }
            Err(error) => {
                warn!(revision, error = %error, "device command failed");
                self.emit(LifecycleEvent::DispatchFailed { revision, error });
                if revision == self.revision && self.retries_left > 0 {
                    self.retries_left -= 1;
                    // Forget the last command so the next compose re-sends it.
                    self.last_command = None;
                }
                self.finish(now)
            }
        }
    }

    /// End every active and queued demand with `cancelled` and return the
    /// device to idle. Called once when the loop stops.
    pub fn shutdown(&mut self, now: Instant) -> Result<Step, ArbiterError> {
        info!(
            active = self.active.len(),
            queued = self.queue.len(),
            "cancelling demands for shutdown"
        );
        let active = self.active.drain().into_iter().map(|e| e.handle);
        let queued = self.queue.drain().into_iter().map(|e| e.handle);
        for handle in active.chain(queued).collect::<Vec<_>>() {
            self.emit(LifecycleEvent::Cancelled { handle });
        }
        self.streams.clear();
        self.inputs.clear();
        self.finish(now)
    }

    // =========================================================================
    // Applying decisions
    // =========================================================================

    /// Resolve, guard and apply a new submission. Does not finish the step.
    fn accept(&mut self, handle: DemandHandle, demand: Demand, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(%handle, kind = %demand.kind, priority = demand.priority, "demand submitted");
        self.emit(LifecycleEvent::Submitted {
            handle,
            kind: demand.kind,
            priority: demand.priority,
        });

        let decision = resolver::resolve(&self.active, &self.device, &demand);
        let guarded = self.guard.guard(handle, decision, &self.device, &demand);
        debug!(%handle, decision = guarded.decision.label(), "resolved");

        if demand.is_continuous() && !matches!(guarded.decision, Decision::Reject(_)) {
            self.streams.register(handle, demand.kind, seq);
        }
        self.apply(handle, demand, seq, guarded.decision, now);
        self.note_verdict(handle, guarded.verdict);
    }

    fn apply(
        &mut self,
        handle: DemandHandle,
        demand: Demand,
        seq: u64,
        decision: Decision,
        now: Instant,
    ) {
        match decision {
            Decision::Admit | Decision::Merge(_) => self.admit(handle, demand, seq, now),
            Decision::Preempt(victims) => {
                for victim in victims {
                    self.preempt(victim, handle);
                }
                self.admit(handle, demand, seq, now);
            }
            Decision::Queue(reason) => self.enqueue(handle, demand, seq, reason),
            Decision::Reject(reason) => {
                info!(%handle, reason = %reason, "demand rejected");
                self.streams.cancel(&handle);
                self.inputs.remove(&handle);
                self.emit(LifecycleEvent::Rejected { handle, reason });
            }
        }
    }

    fn admit(&mut self, handle: DemandHandle, demand: Demand, seq: u64, now: Instant) {
        let merged_with = self.active.handles();
        if let Payload::Input(device) = &demand.payload {
            self.inputs
                .entry(handle)
                .or_insert_with(|| InputState::new(device));
        }
        info!(%handle, priority = demand.priority, "demand admitted");
        self.active.insert(ActiveEntry::new(handle, demand, seq, now));
        self.emit(LifecycleEvent::Admitted { handle, merged_with });
    }

    fn enqueue(&mut self, handle: DemandHandle, demand: Demand, seq: u64, reason: QueueReason) {
        debug!(%handle, reason = %reason, "demand queued");
        self.queue.push(QueuedEntry {
            handle,
            channels: demand.channels(),
            demand,
            seq,
            reason: reason.clone(),
        });
        self.emit(LifecycleEvent::Queued { handle, reason });
    }

    /// Evict `victim` in favour of `by`. Continuous demands wait to resume;
    /// one-shots are done.
    fn preempt(&mut self, victim: DemandHandle, by: DemandHandle) {
        let Some(entry) = self.active.remove(&victim) else {
            return;
        };
        info!(handle = %victim, %by, "demand preempted");
        self.emit(LifecycleEvent::Preempted { handle: victim, by });

        if entry.demand.is_continuous() {
            self.enqueue(victim, entry.demand, entry.seq, QueueReason::Preempted { by });
        } else {
            self.inputs.remove(&victim);
            self.emit(LifecycleEvent::Completed {
                handle: victim,
                outcome: Outcome::Preempted,
            });
        }
    }

    fn note_verdict(&mut self, handle: DemandHandle, verdict: Verdict) {
        let battery = self.device.battery;
        match verdict {
            Verdict::Downgraded => self.emit(LifecycleEvent::Degraded { handle, battery }),
            Verdict::Overridden => self.emit(LifecycleEvent::SafetyOverride { handle, battery }),
            Verdict::Passed | Verdict::Vetoed => {}
        }
    }

    /// Give every queued demand another chance, highest priority first.
    /// Restarts from the top after each admission since that changes the
    /// active set.
    fn reevaluate_queue(&mut self, now: Instant) -> Result<(), ArbiterError> {
        let mut passes = 0;
        'pass: loop {
            passes += 1;
            if passes > MAX_REEVALUATION_PASSES {
                return Err(ArbiterError::InvariantViolated(format!(
                    "queue re-evaluation did not settle after {} admissions",
                    MAX_REEVALUATION_PASSES
                )));
            }

            for handle in self.queue.handles() {
                let Some(entry) = self.queue.get(&handle) else {
                    continue;
                };
                let decision = resolver::resolve_queued(&self.active, &self.device, &entry.demand);
                let guarded = self.guard.guard(handle, decision, &self.device, &entry.demand);

                if let Decision::Queue(reason) = guarded.decision {
                    if reason != entry.reason {
                        self.queue.set_reason(&handle, reason);
                    }
                    continue;
                }

                let Some(entry) = self.queue.remove(&handle) else {
                    continue;
                };
                debug!(%handle, decision = guarded.decision.label(), "queued demand re-evaluated");
                self.apply(handle, entry.demand, entry.seq, guarded.decision, now);
                self.note_verdict(handle, guarded.verdict);
                continue 'pass;
            }
            return Ok(());
        }
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    fn on_battery(&mut self, level: u8, now: Instant) {
        let previous = self.device.battery;
        self.device.battery = level;
        if previous != level {
            debug!(battery = level, previous, "battery update");
        }
        if !self.device.is_connected() {
            return;
        }

        // Continuous motor demands leave the device while the battery is
        // critical; recovery re-admits them through the queue.
        if self.guard.is_critical(level) {
            let yielding: Vec<DemandHandle> = self
                .active
                .iter()
                .filter(|e| {
                    e.demand.is_continuous() && self.guard.must_yield(&self.device, &e.demand)
                })
                .map(|e| e.handle)
                .collect();
            for handle in yielding {
                if let Some(entry) = self.active.remove(&handle) {
                    warn!(
                        %handle,
                        battery = level,
                        "critical battery, motor demand moved to queue"
                    );
                    self.enqueue(handle, entry.demand, entry.seq, QueueReason::LowBattery);
                    self.emit(LifecycleEvent::Degraded {
                        handle,
                        battery: level,
                    });
                }
            }
        }

        if self.battery_notices {
            let notice = if self.guard.is_critical(level) && !self.guard.is_critical(previous) {
                Some(Notification::Error)
            } else if self.guard.is_low(level) && !self.guard.is_low(previous) {
                Some(Notification::Warning)
            } else {
                None
            };
            if let Some(notice) = notice {
                info!(battery = level, ?notice, "battery notice");
                self.accept(DemandHandle::new(), notice.demand(), now);
            }
        }
    }

    fn on_connected(&mut self, model: Option<DeviceModel>) {
        if let Some(model) = model {
            if model != self.device.capabilities.model() {
                self.device.capabilities.set_model(model);
                self.drop_unsupported();
            }
        }
        if self.device.is_connected() {
            return;
        }

        info!("device reconnected");
        self.device.connection = Connection::Connected;
        // Re-send the composed state to the fresh link.
        self.last_command = None;
        self.emit(LifecycleEvent::Reconnected);

        // Reconnection always lands in Idle. A battery that is still critical
        // moves the loop on to Degraded in the same step.
        if self.state != LoopState::Idle {
            self.emit(LifecycleEvent::StateChanged {
                from: self.state,
                to: LoopState::Idle,
            });
            self.state = LoopState::Idle;
        }
    }

    fn on_disconnected(&mut self) {
        if !self.device.is_connected() {
            return;
        }

        warn!(
            active = self.active.len(),
            queued = self.queue.len(),
            "device disconnected, clearing demands"
        );
        self.device.connection = Connection::Disconnected;
        self.emit(LifecycleEvent::Disconnected);

        for entry in self.active.drain() {
            self.emit(LifecycleEvent::Completed {
                handle: entry.handle,
                outcome: Outcome::DeviceUnavailable,
            });
        }
        for entry in self.queue.drain() {
            self.emit(LifecycleEvent::Rejected {
                handle: entry.handle,
                reason: RejectReason::DeviceUnavailable,
            });
        }
        self.streams.clear();
        self.inputs.clear();
    }

    fn on_capabilities(&mut self, model: DeviceModel) {
        if model == self.device.capabilities.model() {
            return;
        }
        info!(?model, "device capabilities changed");
        self.device.capabilities.set_model(model);
        self.drop_unsupported();
    }

    /// Complete active demands the device can no longer represent. Queued
    /// ones are rejected by the next re-evaluation.
    fn drop_unsupported(&mut self) {
        let unsupported: Vec<(DemandHandle, String)> = self
            .active
            .iter()
            .filter_map(|e| match self.device.capabilities.check(&e.demand.payload) {
                Ok(_) => None,
                Err(reason) => Some((e.handle, reason.to_string())),
            })
            .collect();

        for (handle, detail) in unsupported {
            if self.active.remove(&handle).is_some() {
                info!(%handle, detail = %detail, "demand no longer supported");
                self.streams.cancel(&handle);
                self.inputs.remove(&handle);
                self.emit(LifecycleEvent::Completed {
                    handle,
                    outcome: Outcome::Unsupported { detail },
                });
            }
        }
    }

    /// Feed a sample to every active input device that listens to it.
    fn on_sensor(&mut self, sample: SensorEvent) {
        let mut routed_to = Vec::new();
        for entry in self.active.iter() {
            let Payload::Input(device) = &entry.demand.payload else {
                continue;
            };
            let Some(state) = self.inputs.get_mut(&entry.handle) else {
                continue;
            };
            if let Some(reading) = state.apply(device, &sample) {
                routed_to.push(entry.handle);
                self.events.push(LifecycleEvent::Input {
                    handle: entry.handle,
                    reading,
                });
            }
        }
        self.emit(LifecycleEvent::Sensor { sample, routed_to });
    }

    // =========================================================================
    // Step bookkeeping
    // =========================================================================

    fn emit(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    fn finish(&mut self, now: Instant) -> Result<Step, ArbiterError> {
        self.reevaluate_queue(now)?;

        if let Err(detail) = self.active.check_invariants() {
            error!(detail = %detail, "arbitration invariant violated");
            return Err(ArbiterError::InvariantViolated(detail));
        }

        let state = LoopState::derive(&self.device, self.active.len());
        if state != self.state {
            info!(from = %self.state, to = %state, "loop state changed");
            self.emit(LifecycleEvent::StateChanged {
                from: self.state,
                to: state,
            });
            self.state = state;
        }

        let command = if self.device.is_connected() {
            let mut command = compose(&self.active, state == LoopState::Degraded);
            let changed = self
                .last_command
                .as_ref()
                .map_or(true, |last| !last.same_output(&command));
            if changed {
                self.revision += 1;
                command.revision = self.revision;
                self.last_command = Some(command.clone());
                Some(command)
            } else {
                None
            }
        } else {
            None
        };

        Ok(Step {
            events: std::mem::take(&mut self.events),
            command,
        })
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("state", &self.state)
            .field("active", &self.active.len())
            .field("queued", &self.queue.len())
            .field("streams", &self.streams.len())
            .field("revision", &self.revision)
            .finish()
    }
}
