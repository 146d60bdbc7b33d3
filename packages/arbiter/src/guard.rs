//! Power and safety guard.
//!
//! Runs after the resolver and before anything is applied. It can only make a
//! decision more conservative:
//!
//! - Disconnected device: every decision becomes `Reject(DeviceUnavailable)`.
//! - Critical battery: admitting a motor-driving demand is downgraded to
//!   `Queue(LowBattery)`, unless the demand sets `override_safety`, in which
//!   case the decision passes unchanged and the override is logged.

use tracing::{debug, warn};

use crate::demand::{Demand, DemandHandle};
use crate::resolver::{Decision, QueueReason, RejectReason};
use crate::state::DeviceState;

/// What the guard did to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    /// Turned an admitting decision into a queue.
    Downgraded,
    /// Would have downgraded, but the demand overrides safety.
    Overridden,
    /// Turned the decision into a rejection.
    Vetoed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guarded {
    pub decision: Decision,
    pub verdict: Verdict,
}

impl Guarded {
    fn passed(decision: Decision) -> Self {
        Self {
            decision,
            verdict: Verdict::Passed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerGuard {
    /// Battery strictly below this needs an override for motor use.
    pub critical_battery: u8,
    /// Battery strictly below this counts as low (notices only).
    pub low_battery: u8,
}

impl PowerGuard {
    pub fn new(critical_battery: u8, low_battery: u8) -> Self {
        Self {
            critical_battery,
            low_battery,
        }
    }

    pub fn guard(
        &self,
        handle: DemandHandle,
        decision: Decision,
        device: &DeviceState,
        demand: &Demand,
    ) -> Guarded {
        if !device.is_connected() {
            if matches!(decision, Decision::Reject(_)) {
                return Guarded::passed(decision);
            }
            debug!(%handle, decision = decision.label(), "device disconnected, vetoing");
            return Guarded {
                decision: Decision::Reject(RejectReason::DeviceUnavailable),
                verdict: Verdict::Vetoed,
            };
        }

        if !decision.admits() || !demand.drives_motor() || !self.is_critical(device.battery) {
            return Guarded::passed(decision);
        }

        if demand.override_safety {
            warn!(
                %handle,
                battery = device.battery,
                threshold = self.critical_battery,
                "safety override: admitting motor demand at critical battery"
            );
            return Guarded {
                decision,
                verdict: Verdict::Overridden,
            };
        }

        debug!(
            %handle,
            battery = device.battery,
            decision = decision.label(),
            "critical battery, downgrading motor demand to queue"
        );
        Guarded {
            decision: Decision::Queue(QueueReason::LowBattery),
            verdict: Verdict::Downgraded,
        }
    }

    /// Whether an already-active demand must leave the active set at the
    /// current battery level.
    pub fn must_yield(&self, device: &DeviceState, demand: &Demand) -> bool {
        device.is_connected()
            && self.is_critical(device.battery)
            && demand.drives_motor()
            && !demand.override_safety
    }

    pub fn is_critical(&self, battery: u8) -> bool {
        battery < self.critical_battery
    }

    pub fn is_low(&self, battery: u8) -> bool {
        battery < self.low_battery
    }
}

impl Default for PowerGuard {
    fn default() -> Self {
        Self::new(10, 20)
    }
}
