//! Lifecycle events.
//!
//! Every externally visible step of the loop produces one of these. Events
//! about a demand carry its handle; for any one demand they arrive in the
//! order `submitted → admitted | queued | rejected → [preempted] → terminal`.
//! Exactly one terminal event (`completed`, `rejected`, `cancelled`) is
//! emitted per submitted demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::demand::{DemandHandle, DemandKind};
use crate::feedback::{InputReading, SensorEvent};
use crate::resolver::{QueueReason, RejectReason};
use crate::state::LoopState;

/// How an admitted demand left the active set for good.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// One-shot span elapsed.
    Finished,
    /// One-shot demand evicted by a higher priority demand.
    Preempted,
    /// Connection to the device was lost.
    DeviceUnavailable,
    /// The device stopped supporting the payload (capability change).
    Unsupported { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Submitted {
        handle: DemandHandle,
        kind: DemandKind,
        priority: i32,
    },
    Admitted {
        handle: DemandHandle,
        /// Active demands this one composes with.
        merged_with: Vec<DemandHandle>,
    },
    Queued {
        handle: DemandHandle,
        reason: QueueReason,
    },
    Preempted {
        handle: DemandHandle,
        by: DemandHandle,
    },
    /// The power guard held this demand back.
    Degraded {
        handle: DemandHandle,
        battery: u8,
    },
    /// The power guard let a motor demand through because it overrides safety.
    SafetyOverride {
        handle: DemandHandle,
        battery: u8,
    },
    Completed {
        handle: DemandHandle,
        outcome: Outcome,
    },
    Rejected {
        handle: DemandHandle,
        reason: RejectReason,
    },
    Cancelled {
        handle: DemandHandle,
    },
    /// A reading produced for the owner of a virtual input device.
    Input {
        handle: DemandHandle,
        reading: InputReading,
    },
    Sensor {
        sample: SensorEvent,
        routed_to: Vec<DemandHandle>,
    },
    StateChanged {
        from: LoopState,
        to: LoopState,
    },
    Disconnected,
    Reconnected,
    DispatchFailed {
        revision: u64,
        error: String,
    },
}

impl LifecycleEvent {
    /// The demand this event is about, if any.
    pub fn handle(&self) -> Option<DemandHandle> {
        match self {
            LifecycleEvent::Submitted { handle, .. }
            | LifecycleEvent::Admitted { handle, .. }
            | LifecycleEvent::Queued { handle, .. }
            | LifecycleEvent::Preempted { handle, .. }
            | LifecycleEvent::Degraded { handle, .. }
            | LifecycleEvent::SafetyOverride { handle, .. }
            | LifecycleEvent::Completed { handle, .. }
            | LifecycleEvent::Rejected { handle, .. }
            | LifecycleEvent::Cancelled { handle }
            | LifecycleEvent::Input { handle, .. } => Some(*handle),
            LifecycleEvent::Sensor { .. }
            | LifecycleEvent::StateChanged { .. }
            | LifecycleEvent::Disconnected
            | LifecycleEvent::Reconnected
            | LifecycleEvent::DispatchFailed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Completed { .. }
                | LifecycleEvent::Rejected { .. }
                | LifecycleEvent::Cancelled { .. }
        )
    }

    /// Short name, matching the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Submitted { .. } => "submitted",
            LifecycleEvent::Admitted { .. } => "admitted",
            LifecycleEvent::Queued { .. } => "queued",
            LifecycleEvent::Preempted { .. } => "preempted",
            LifecycleEvent::Degraded { .. } => "degraded",
            LifecycleEvent::SafetyOverride { .. } => "safety_override",
            LifecycleEvent::Completed { .. } => "completed",
            LifecycleEvent::Rejected { .. } => "rejected",
            LifecycleEvent::Cancelled { .. } => "cancelled",
            LifecycleEvent::Input { .. } => "input",
            LifecycleEvent::Sensor { .. } => "sensor",
            LifecycleEvent::StateChanged { .. } => "state_changed",
            LifecycleEvent::Disconnected => "disconnected",
            LifecycleEvent::Reconnected => "reconnected",
            LifecycleEvent::DispatchFailed { .. } => "dispatch_failed",
        }
    }

    /// Human-readable notice for status displays.
    ///
    /// Only rejections, downgrades, overrides and connectivity changes
    /// produce a notice; routine admissions do not.
    pub fn notice(&self) -> Option<String> {
        match self {
            LifecycleEvent::Rejected { reason, .. } => match reason {
                RejectReason::UnsupportedCapability { detail } => {
                    Some(format!("The ball can't do that: {}.", detail))
                }
                RejectReason::DeviceUnavailable => {
                    Some("The ball is not connected; try again once it reconnects.".to_string())
                }
            },
            LifecycleEvent::Degraded { battery, .. } => Some(format!(
                "Battery at {}%: motor use is paused until it recovers.",
                battery
            )),
            LifecycleEvent::SafetyOverride { battery, .. } => Some(format!(
                "Battery at {}%: motor use allowed by safety override.",
                battery
            )),
            LifecycleEvent::Completed {
                outcome: Outcome::Unsupported { detail },
                ..
            } => Some(format!("Stopped: the ball no longer supports {}.", detail)),
            LifecycleEvent::Disconnected => Some("Connection to the ball was lost.".to_string()),
            LifecycleEvent::Reconnected => Some("The ball is connected again.".to_string()),
            LifecycleEvent::DispatchFailed { error, .. } => {
                Some(format!("Sending a command to the ball failed: {}", error))
            }
            _ => None,
        }
    }
}

/// A lifecycle event stamped by the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Loop-wide sequence number; gives a total order across demands.
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        let handle = DemandHandle::new();
        assert!(LifecycleEvent::Cancelled { handle }.is_terminal());
        assert!(LifecycleEvent::Completed {
            handle,
            outcome: Outcome::Finished
        }
        .is_terminal());
        assert!(!LifecycleEvent::Preempted { handle, by: handle }.is_terminal());
        assert!(!LifecycleEvent::Disconnected.is_terminal());
    }

    #[test]
    fn test_handle_extraction() {
        let handle = DemandHandle::new();
        assert_eq!(
            LifecycleEvent::Queued {
                handle,
                reason: QueueReason::LowBattery
            }
            .handle(),
            Some(handle)
        );
        assert_eq!(LifecycleEvent::Reconnected.handle(), None);
    }

    #[test]
    fn test_notices_only_for_noteworthy_events() {
        let handle = DemandHandle::new();
        assert!(LifecycleEvent::Admitted {
            handle,
            merged_with: vec![]
        }
        .notice()
        .is_none());

        let notice = LifecycleEvent::Rejected {
            handle,
            reason: RejectReason::DeviceUnavailable,
        }
        .notice()
        .unwrap();
        assert!(notice.contains("not connected"));

        let notice = LifecycleEvent::Degraded { handle, battery: 7 }.notice().unwrap();
        assert!(notice.contains("7%"));
    }

    #[test]
    fn test_envelope_flattens_event() {
        let handle = DemandHandle::new();
        let envelope = EventEnvelope {
            seq: 3,
            at: Utc::now(),
            event: LifecycleEvent::Cancelled { handle },
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["handle"], handle.to_string());
        assert_eq!(envelope.event.name(), "cancelled");
    }
}
