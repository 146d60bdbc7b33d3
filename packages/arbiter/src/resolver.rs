//! Priority resolver.
//!
//! [`resolve`] is a pure function of the active set, the device snapshot and
//! one new demand. It never blocks and never mutates; applying the decision
//! is the arbitration loop's job.
//!
//! # Rules
//!
//! 1. A payload the device cannot represent is rejected.
//! 2. An exclusive demand must outrank the active exclusive demand, if any.
//! 3. Any demand must outrank every active demand claiming one of its
//!    channels. Same-channel contention is never merged.
//! 4. Outranked demands become preemption victims; if any contender cannot be
//!    outranked the new demand is queued.
//!
//! "Outrank" means strictly higher priority. At equal priority the incumbent
//! wins (FIFO) unless the newcomer carries `override_safety`. Queued demands
//! being re-evaluated never get the override tie-break, so re-evaluation
//! cannot ping-pong between two equal-priority demands.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::active::ActiveSet;
use crate::capability::ChannelSet;
use crate::demand::{Demand, DemandHandle};
use crate::state::DeviceState;

pub type HandleList = SmallVec<[DemandHandle; 4]>;

/// Why a demand is waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum QueueReason {
    /// Another exclusive demand holds the device and was not outranked.
    ExclusiveHeld { holder: DemandHandle, priority: i32 },
    /// A channel this demand needs is owned by a demand it does not outrank.
    ChannelBusy {
        channels: ChannelSet,
        holder: DemandHandle,
        priority: i32,
    },
    /// Battery is critical and the demand drives the motor without override.
    LowBattery,
    /// Continuous demand pushed out by a higher priority demand; resumes later.
    Preempted { by: DemandHandle },
}

impl fmt::Display for QueueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueReason::ExclusiveHeld { holder, priority } => write!(
                f,
                "waiting for exclusive demand {} (priority {})",
                holder, priority
            ),
            QueueReason::ChannelBusy {
                channels,
                holder,
                priority,
            } => write!(
                f,
                "channel {} busy with demand {} (priority {})",
                channels, holder, priority
            ),
            QueueReason::LowBattery => write!(f, "battery too low for motor use"),
            QueueReason::Preempted { by } => write!(f, "preempted by {}", by),
        }
    }
}

/// Why a demand was refused outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    UnsupportedCapability { detail: String },
    DeviceUnavailable,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::UnsupportedCapability { detail } => {
                write!(f, "unsupported capability: {}", detail)
            }
            RejectReason::DeviceUnavailable => write!(f, "device unavailable"),
        }
    }
}

/// The single output type of the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Runs alone (or as the exclusive demand next to composable ones).
    Admit,
    Queue(QueueReason),
    /// Admit after evicting these demands.
    Preempt(HandleList),
    /// Admit alongside these active demands.
    Merge(HandleList),
    Reject(RejectReason),
}

impl Decision {
    /// True for decisions that put the demand into the active set.
    pub fn admits(&self) -> bool {
        matches!(self, Decision::Admit | Decision::Preempt(_) | Decision::Merge(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Admit => "admit",
            Decision::Queue(_) => "queue",
            Decision::Preempt(_) => "preempt",
            Decision::Merge(_) => "merge",
            Decision::Reject(_) => "reject",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TieBreak {
    /// `override_safety` wins ties against the incumbent.
    Override,
    /// Incumbent always wins ties.
    Fifo,
}

/// Decide what to do with a newly submitted demand.
pub fn resolve(active: &ActiveSet, device: &DeviceState, demand: &Demand) -> Decision {
    decide(active, device, demand, TieBreak::Override)
}

/// Decide for a demand coming back out of the wait queue.
pub(crate) fn resolve_queued(active: &ActiveSet, device: &DeviceState, demand: &Demand) -> Decision {
    decide(active, device, demand, TieBreak::Fifo)
}

fn outranks(challenger: &Demand, incumbent: &Demand, tie: TieBreak) -> bool {
    challenger.priority > incumbent.priority
        || (challenger.priority == incumbent.priority
            && tie == TieBreak::Override
            && challenger.override_safety)
}

fn decide(active: &ActiveSet, device: &DeviceState, demand: &Demand, tie: TieBreak) -> Decision {
    let channels = match device.capabilities.check(&demand.payload) {
        Ok(channels) => channels,
        Err(unsupported) => {
            return Decision::Reject(RejectReason::UnsupportedCapability {
                detail: unsupported.to_string(),
            })
        }
    };

    let mut victims = HandleList::new();

    if demand.is_exclusive() {
        if let Some(held) = active.exclusive() {
            if !outranks(demand, &held.demand, tie) {
                return Decision::Queue(QueueReason::ExclusiveHeld {
                    holder: held.handle,
                    priority: held.demand.priority,
                });
            }
            victims.push(held.handle);
        }
    }

    for contender in active.claiming(channels) {
        if victims.contains(&contender.handle) {
            continue;
        }
        if !outranks(demand, &contender.demand, tie) {
            return Decision::Queue(QueueReason::ChannelBusy {
                channels: contender.channels.intersection(channels),
                holder: contender.handle,
                priority: contender.demand.priority,
            });
        }
        victims.push(contender.handle);
    }

    if !victims.is_empty() {
        Decision::Preempt(victims)
    } else if demand.is_exclusive() || active.is_empty() {
        Decision::Admit
    } else {
        Decision::Merge(active.iter().map(|e| e.handle).collect())
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;
    use crate::active::ActiveEntry;
    use crate::capability::{CapabilityModel, Channel, DeviceModel};
    use crate::demand::{InputDevice, LedPattern, MatrixContent, MotionVector, Payload, Rgb};

    fn admit(set: &mut ActiveSet, demand: Demand, seq: u64) -> DemandHandle {
        let handle = DemandHandle::new();
        set.insert(ActiveEntry::new(handle, demand, seq, Instant::now()));
        handle
    }

    fn knob() -> Demand {
        Demand::input(InputDevice::Knob {
            min: 0.0,
            max: 100.0,
            step: 1.0,
        })
    }

    fn led(priority: i32) -> Demand {
        Demand::expression(LedPattern::pulse(Rgb::BLUE)).with_priority(priority)
    }

    #[test]
    fn test_exclusive_admitted_when_none_active() {
        let active = ActiveSet::new();
        let device = DeviceState::default();

        assert_eq!(resolve(&active, &device, &knob().with_priority(5)), Decision::Admit);
    }

    #[test]
    fn test_exclusive_next_to_composable_on_other_channel() {
        let mut active = ActiveSet::new();
        admit(&mut active, led(1), 0);
        let device = DeviceState::default();

        assert_eq!(resolve(&active, &device, &knob().with_priority(5)), Decision::Admit);
    }

    #[test]
    fn test_exclusive_higher_priority_preempts() {
        let mut active = ActiveSet::new();
        let held = admit(&mut active, knob().with_priority(3), 0);
        let device = DeviceState::default();

        let decision = resolve(&active, &device, &knob().with_priority(4));
        assert_eq!(decision, Decision::Preempt(HandleList::from_slice(&[held])));
    }

    #[test]
    fn test_exclusive_equal_priority_queues() {
        let mut active = ActiveSet::new();
        let held = admit(&mut active, knob().with_priority(3), 0);
        let device = DeviceState::default();

        let decision = resolve(&active, &device, &knob().with_priority(3));
        assert_eq!(
            decision,
            Decision::Queue(QueueReason::ExclusiveHeld {
                holder: held,
                priority: 3
            })
        );
    }

    #[test]
    fn test_exclusive_equal_priority_with_override_preempts() {
        let mut active = ActiveSet::new();
        let held = admit(&mut active, knob().with_priority(3), 0);
        let device = DeviceState::default();
        let challenger = knob().with_priority(3).override_safety();

        assert_eq!(
            resolve(&active, &device, &challenger),
            Decision::Preempt(HandleList::from_slice(&[held]))
        );
        // Re-evaluation from the queue never uses the override tie-break.
        assert!(matches!(
            resolve_queued(&active, &device, &challenger),
            Decision::Queue(QueueReason::ExclusiveHeld { .. })
        ));
    }

    #[test]
    fn test_exclusive_lower_priority_queues() {
        let mut active = ActiveSet::new();
        admit(&mut active, knob().with_priority(5), 0);
        let device = DeviceState::default();

        assert!(matches!(
            resolve(&active, &device, &knob().with_priority(1)),
            Decision::Queue(_)
        ));
    }

    #[test]
    fn test_composable_merges_on_disjoint_channels() {
        let mut active = ActiveSet::new();
        let input = admit(&mut active, knob().with_priority(5), 0);
        let device = DeviceState::default();

        let decision = resolve(&active, &device, &led(1));
        assert_eq!(decision, Decision::Merge(HandleList::from_slice(&[input])));
    }

    #[test]
    fn test_composable_alone_is_admit() {
        let active = ActiveSet::new();
        let device = DeviceState::default();
        assert_eq!(resolve(&active, &device, &led(1)), Decision::Admit);
    }

    #[test]
    fn test_composable_conflict_resolved_by_priority() {
        let mut active = ActiveSet::new();
        let low = admit(&mut active, led(1), 0);
        let device = DeviceState::default();

        assert_eq!(
            resolve(&active, &device, &led(4)),
            Decision::Preempt(HandleList::from_slice(&[low]))
        );
        assert_eq!(
            resolve(&active, &device, &led(1)),
            Decision::Queue(QueueReason::ChannelBusy {
                channels: ChannelSet::only(Channel::Led),
                holder: low,
                priority: 1,
            })
        );
    }

    #[test]
    fn test_exclusive_must_outrank_same_channel_composable() {
        let mut active = ActiveSet::new();
        let spin = admit(
            &mut active,
            Demand::motion(MotionVector::spin(60)).composable().with_priority(6),
            0,
        );
        let device = DeviceState::default();

        assert!(matches!(
            resolve(&active, &device, &knob().with_priority(5)),
            Decision::Queue(QueueReason::ChannelBusy { holder, .. }) if holder == spin
        ));
        assert_eq!(
            resolve(&active, &device, &knob().with_priority(7)),
            Decision::Preempt(HandleList::from_slice(&[spin]))
        );
    }

    #[test]
    fn test_preempts_exclusive_and_channel_owner_together() {
        let mut active = ActiveSet::new();
        let exclusive_led = admit(&mut active, led(2).exclusive(), 0);
        let spin = admit(
            &mut active,
            Demand::motion(MotionVector::spin(60)).composable().with_priority(2),
            1,
        );
        let device = DeviceState::default();

        let decision = resolve(&active, &device, &knob().with_priority(9));
        assert_eq!(
            decision,
            Decision::Preempt(HandleList::from_slice(&[exclusive_led, spin]))
        );
    }

    #[test]
    fn test_matrix_rejected_on_mini() {
        let active = ActiveSet::new();
        let device = DeviceState::new(CapabilityModel::new(DeviceModel::Mini), 10);
        let demand = Demand::new(
            crate::demand::DemandKind::StatusSignal,
            Payload::Matrix(MatrixContent::Text {
                text: "3 new mails".to_string(),
                color: Rgb::WHITE,
            }),
        );

        assert!(matches!(
            resolve(&active, &device, &demand),
            Decision::Reject(RejectReason::UnsupportedCapability { .. })
        ));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let mut active = ActiveSet::new();
        admit(&mut active, led(1), 0);
        admit(&mut active, knob().with_priority(5), 1);
        let device = DeviceState::default();
        let demand = knob().with_priority(2);

        let first = resolve(&active, &device, &demand);
        for _ in 0..10 {
            assert_eq!(resolve(&active, &device, &demand), first);
        }
    }
}
