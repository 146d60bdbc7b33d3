//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_CAPACITY;
use crate::capability::{CapabilityModel, DeviceModel, ToolSpec};
use crate::error::ArbiterError;
use crate::guard::PowerGuard;
use crate::state::DeviceState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub device_model: DeviceModel,
    /// Battery strictly below this degrades the loop; motor use needs an override.
    pub critical_battery: u8,
    /// Battery strictly below this triggers the low-battery notice.
    pub low_battery: u8,
    /// Submit status signals when the battery crosses the thresholds.
    pub battery_notices: bool,
    /// Lifecycle bus capacity.
    pub bus_capacity: usize,
    /// Times a failed dispatch of the latest command is retried.
    pub dispatch_retries: u32,
    /// Tools registered before the loop starts.
    pub tools: Vec<ToolSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_model: DeviceModel::Bolt,
            critical_battery: 10,
            low_battery: 20,
            battery_notices: false,
            bus_capacity: DEFAULT_CAPACITY,
            dispatch_retries: 1,
            tools: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ArbiterError> {
        if self.critical_battery > 100 || self.low_battery > 100 {
            return Err(ArbiterError::InvalidConfig(
                "battery thresholds must be within 0-100".to_string(),
            ));
        }
        if self.critical_battery > self.low_battery {
            return Err(ArbiterError::InvalidConfig(format!(
                "critical battery ({}) above low battery ({})",
                self.critical_battery, self.low_battery
            )));
        }
        if self.bus_capacity == 0 {
            return Err(ArbiterError::InvalidConfig(
                "bus capacity must be at least 1".to_string(),
            ));
        }
        if let Some(tool) = self.tools.iter().find(|t| t.channels.is_empty()) {
            return Err(ArbiterError::InvalidConfig(format!(
                "tool '{}' claims no channel",
                tool.name
            )));
        }
        Ok(())
    }

    pub fn capability_model(&self) -> CapabilityModel {
        self.tools
            .iter()
            .fold(CapabilityModel::new(self.device_model), |model, tool| {
                model.with_tool(tool.name.clone(), tool.channels)
            })
    }

    /// Initial snapshot; the guard and the snapshot share one threshold.
    pub fn device_state(&self) -> DeviceState {
        DeviceState::new(self.capability_model(), self.critical_battery)
    }

    pub fn power_guard(&self) -> PowerGuard {
        PowerGuard::new(self.critical_battery, self.low_battery)
    }
}
