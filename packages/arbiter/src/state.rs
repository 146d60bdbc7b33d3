//! Device state snapshot and loop state.
//!
//! The snapshot is written only by the arbitration loop. Everyone else sees
//! it read-only: the resolver and guard through `&DeviceState`, external
//! observers through the watch channel behind [`crate::EngineHandle::capabilities`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityModel, Channel, ChannelSet, DeviceModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connection {
    Connected,
    Disconnected,
}

/// Battery, connection and capability flags as last reported by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub battery: u8,
    pub connection: Connection,
    pub capabilities: CapabilityModel,
    /// Battery level strictly below which motor use needs an override.
    pub critical_battery: u8,
}

impl DeviceState {
    pub fn new(capabilities: CapabilityModel, critical_battery: u8) -> Self {
        Self {
            battery: 100,
            connection: Connection::Connected,
            capabilities,
            critical_battery,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == Connection::Connected
    }

    pub fn is_battery_critical(&self) -> bool {
        self.battery < self.critical_battery
    }

    /// Channels a producer can currently expect to get without an override.
    pub fn usable_channels(&self) -> ChannelSet {
        if !self.is_connected() {
            return ChannelSet::EMPTY;
        }
        let channels = self.capabilities.channels();
        if self.is_battery_critical() {
            channels.without(Channel::Motor)
        } else {
            channels
        }
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(CapabilityModel::new(DeviceModel::Bolt), 10)
    }
}

/// Arbitration loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Active,
    Degraded,
    Disconnected,
}

impl LoopState {
    /// Derive the loop state from the snapshot and the active set size.
    pub fn derive(device: &DeviceState, active_len: usize) -> Self {
        if !device.is_connected() {
            LoopState::Disconnected
        } else if device.is_battery_critical() {
            LoopState::Degraded
        } else if active_len == 0 {
            LoopState::Idle
        } else {
            LoopState::Active
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Active => write!(f, "active"),
            LoopState::Degraded => write!(f, "degraded"),
            LoopState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Answer to a capability query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub model: DeviceModel,
    pub channels: ChannelSet,
    pub usable: ChannelSet,
    pub tools: Vec<String>,
    pub state: LoopState,
    pub battery: u8,
    pub active: usize,
    pub queued: usize,
}

impl CapabilityReport {
    pub fn new(device: &DeviceState, state: LoopState, active: usize, queued: usize) -> Self {
        Self {
            model: device.capabilities.model(),
            channels: device.capabilities.channels(),
            usable: device.usable_channels(),
            tools: device.capabilities.tools().map(|t| t.name.clone()).collect(),
            state,
            battery: device.battery,
            active,
            queued,
        }
    }
}
