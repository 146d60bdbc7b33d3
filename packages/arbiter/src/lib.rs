//! # Arbiter
//!
//! Decides, continuously, which competing demands get to drive one shared
//! robotic ball: its LEDs, its matrix display and its motors.
//!
//! ## Core Concepts
//!
//! - [`Demand`]: a request for device time with a priority, a span
//!   (one-shot or continuous), an exclusivity and a capability-tagged payload.
//! - [`resolve`]: a pure function from (active set, device snapshot, demand)
//!   to one [`Decision`].
//! - [`PowerGuard`]: makes decisions more conservative under low battery or a
//!   lost connection, unless the demand overrides safety.
//! - [`compose`]: turns the active set into one [`DeviceCommand`], one
//!   command per channel.
//! - [`Engine`]: the single task that owns all of the above and talks to the
//!   [`Transport`].
//!
//! ## Architecture
//!
//! ```text
//! Producers (expression, input, reactions, status)
//!     │ submit / cancel
//!     ▼
//! inbound queue ◄──────────── feedback (battery, link, sensors)
//!     │
//!     ▼
//! Arbiter step
//!     ├─► resolve() ─► PowerGuard ─► apply to active set / queue
//!     ├─► re-evaluate queue
//!     ├─► check invariants
//!     └─► compose() ─► DeviceCommand ─► dispatcher ─► Transport
//!                           │
//!                           └─► lifecycle events ─► EventBus / tickets
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one exclusive demand is active**
//! 2. **No two active demands claim the same channel**
//! 3. **Exactly one terminal event per demand** (`completed`, `rejected` or `cancelled`)
//! 4. **Only the loop mutates state** - everyone else reads snapshots
//!
//! A broken invariant halts the loop with [`ArbiterError::InvariantViolated`].
//!
//! ## Example
//!
//! ```ignore
//! use arbiter::{Demand, Emotion, Engine, InputDevice, LifecycleEvent};
//!
//! let (handle, _task) = Engine::builder(my_transport).build()?.start();
//!
//! // A volume knob: spin the ball to change the value.
//! let knob = handle.submit_tracked(Demand::input(InputDevice::Knob {
//!     min: 0.0,
//!     max: 100.0,
//!     step: 5.0,
//! }).with_priority(5))?;
//!
//! // A calm glow next to it, on the LED channel.
//! handle.submit(Emotion::Calm.demand(0.4, None))?;
//!
//! // Later, done with the knob.
//! handle.cancel(knob.handle()).await?;
//! ```

mod active;
mod arbiter;
mod bus;
mod capability;
mod composer;
mod config;
mod demand;
mod engine;
mod error;
mod event;
mod feedback;
mod guard;
mod queue;
mod registry;
mod resolver;
mod state;
mod transport;

pub mod expression;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(test)]
mod stress_tests;

pub use active::{ActiveEntry, ActiveSet};
pub use arbiter::{ActiveSummary, Arbiter, QueuedSummary, Snapshot, Step};
pub use bus::EventBus;
pub use capability::{CapabilityModel, Channel, ChannelSet, DeviceModel, ToolSpec, Unsupported};
pub use composer::{compose, DeviceCommand, DeviceMode, LedCommand, MatrixCommand, MotorCommand};
pub use config::EngineConfig;
pub use demand::{
    Demand, DemandHandle, DemandKind, Exclusivity, InputDevice, LedPattern, MatrixContent,
    MotionVector, Payload, PatternStyle, Rgb, SensorKind, Span, ToolPayload,
};
pub use engine::{Engine, EngineBuilder, EngineHandle, Ticket};
pub use error::ArbiterError;
pub use event::{EventEnvelope, LifecycleEvent, Outcome};
pub use expression::{
    AssistantState, Emotion, ExpressionContext, ExpressionLog, ExpressionRecord, ExpressionStats,
    MessageKind, Notification, SystemLoad, TimeOfDay, UserActivity,
};
pub use feedback::{Feedback, InputReading, SensorEvent, ToolRegistration};
pub use guard::{Guarded, PowerGuard, Verdict};
pub use queue::{QueuedEntry, WaitQueue};
pub use registry::{CancelOutcome, StreamRegistry};
pub use resolver::{resolve, Decision, HandleList, QueueReason, RejectReason};
pub use state::{CapabilityReport, Connection, DeviceState, LoopState};
pub use transport::Transport;

pub use async_trait::async_trait;
