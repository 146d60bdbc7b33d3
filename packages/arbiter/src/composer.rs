//! Mode composer.
//!
//! Turns the active set into one [`DeviceCommand`]: exactly one command per
//! output channel, which the transport applies atomically. Demands on
//! disjoint channels are carried side by side, which is what lets a
//! continuous input device (motor) and an idle expression (LED) run at the
//! same time.

use serde::{Deserialize, Serialize};

use crate::active::{ActiveEntry, ActiveSet};
use crate::capability::Channel;
use crate::demand::{
    DemandHandle, DemandKind, InputDevice, LedPattern, MatrixContent, MotionVector, Payload,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedCommand {
    Off,
    Show {
        pattern: LedPattern,
        owner: DemandHandle,
    },
    Tool {
        tool: String,
        data: serde_json::Value,
        owner: DemandHandle,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatrixCommand {
    Blank,
    Show {
        content: MatrixContent,
        owner: DemandHandle,
    },
    Tool {
        tool: String,
        data: serde_json::Value,
        owner: DemandHandle,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MotorCommand {
    Stop,
    Drive {
        motion: MotionVector,
        owner: DemandHandle,
    },
    /// Stabilisation off so the user can turn or tilt the ball; sensor
    /// samples are routed to `owner`.
    Sense {
        device: InputDevice,
        owner: DemandHandle,
    },
    Tool {
        tool: String,
        data: serde_json::Value,
        owner: DemandHandle,
    },
}

/// Summary of what the device is doing, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceMode {
    Idle,
    Expression,
    InputDevice,
    /// An input device and an expression at the same time.
    Hybrid,
    /// Nothing is admitted to the motor because the battery is critical.
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Incremented by the loop for every dispatched command.
    pub revision: u64,
    pub mode: DeviceMode,
    pub led: LedCommand,
    pub matrix: MatrixCommand,
    pub motor: MotorCommand,
}

impl DeviceCommand {
    /// Everything off.
    pub fn idle() -> Self {
        Self {
            revision: 0,
            mode: DeviceMode::Idle,
            led: LedCommand::Off,
            matrix: MatrixCommand::Blank,
            motor: MotorCommand::Stop,
        }
    }

    /// Same output, ignoring the revision stamp.
    pub fn same_output(&self, other: &DeviceCommand) -> bool {
        self.mode == other.mode
            && self.led == other.led
            && self.matrix == other.matrix
            && self.motor == other.motor
    }

    /// Demands named as owners of a channel in this command.
    pub fn owners(&self) -> Vec<DemandHandle> {
        let mut owners = Vec::new();
        let mut push = |h: DemandHandle| {
            if !owners.contains(&h) {
                owners.push(h);
            }
        };
        match &self.led {
            LedCommand::Show { owner, .. } | LedCommand::Tool { owner, .. } => push(*owner),
            LedCommand::Off => {}
        }
        match &self.matrix {
            MatrixCommand::Show { owner, .. } | MatrixCommand::Tool { owner, .. } => push(*owner),
            MatrixCommand::Blank => {}
        }
        match &self.motor {
            MotorCommand::Drive { owner, .. }
            | MotorCommand::Sense { owner, .. }
            | MotorCommand::Tool { owner, .. } => push(*owner),
            MotorCommand::Stop => {}
        }
        owners
    }
}

/// Compose the active set into a single device command.
///
/// `maintenance` marks a degraded loop; it only affects the reported mode
/// when the motor ends up idle.
pub fn compose(active: &ActiveSet, maintenance: bool) -> DeviceCommand {
    let led = match active.owner_of(Channel::Led) {
        None => LedCommand::Off,
        Some(entry) => led_command(entry),
    };
    let matrix = match active.owner_of(Channel::Matrix) {
        None => MatrixCommand::Blank,
        Some(entry) => matrix_command(entry),
    };
    let motor = match active.owner_of(Channel::Motor) {
        None => MotorCommand::Stop,
        Some(entry) => motor_command(entry),
    };

    let has_input = active.iter().any(|e| e.demand.kind == DemandKind::Input);
    let has_expression = active.iter().any(|e| e.demand.kind != DemandKind::Input);
    let mode = match (has_input, has_expression) {
        (true, true) => DeviceMode::Hybrid,
        (true, false) => DeviceMode::InputDevice,
        _ if maintenance && motor == MotorCommand::Stop => DeviceMode::Maintenance,
        (false, true) => DeviceMode::Expression,
        (false, false) => DeviceMode::Idle,
    };

    DeviceCommand {
        revision: 0,
        mode,
        led,
        matrix,
        motor,
    }
}

fn led_command(entry: &ActiveEntry) -> LedCommand {
    match &entry.demand.payload {
        Payload::Led(pattern) => LedCommand::Show {
            pattern: pattern.clone(),
            owner: entry.handle,
        },
        Payload::Tool(tool) => LedCommand::Tool {
            tool: tool.tool.clone(),
            data: tool.data.clone(),
            owner: entry.handle,
        },
        _ => LedCommand::Off,
    }
}

fn matrix_command(entry: &ActiveEntry) -> MatrixCommand {
    match &entry.demand.payload {
        Payload::Matrix(content) => MatrixCommand::Show {
            content: content.clone(),
            owner: entry.handle,
        },
        Payload::Tool(tool) => MatrixCommand::Tool {
            tool: tool.tool.clone(),
            data: tool.data.clone(),
            owner: entry.handle,
        },
        _ => MatrixCommand::Blank,
    }
}

fn motor_command(entry: &ActiveEntry) -> MotorCommand {
    match &entry.demand.payload {
        Payload::Motion(motion) => MotorCommand::Drive {
            motion: *motion,
            owner: entry.handle,
        },
        Payload::Input(device) => MotorCommand::Sense {
            device: device.clone(),
            owner: entry.handle,
        },
        Payload::Tool(tool) => MotorCommand::Tool {
            tool: tool.tool.clone(),
            data: tool.data.clone(),
            owner: entry.handle,
        },
        _ => MotorCommand::Stop,
    }
}
