//! Device feedback and virtual input readings.
//!
//! Feedback arrives already normalised by the transport: the loop never sees
//! raw sensor bytes. Sensor samples are turned into readings for whichever
//! active input demand listens to them.

use serde::{Deserialize, Serialize};

use crate::capability::{ChannelSet, DeviceModel};
use crate::demand::{InputDevice, SensorKind};

/// One normalised sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorEvent {
    /// Yaw change since the previous sample, in degrees. Positive is clockwise.
    Rotation { degrees: f32 },
    /// Absolute attitude in degrees.
    Tilt { pitch: f32, roll: f32 },
    Tap,
    Collision { magnitude: f32 },
}

impl SensorEvent {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorEvent::Rotation { .. } => SensorKind::Rotation,
            SensorEvent::Tilt { .. } => SensorKind::Tilt,
            SensorEvent::Tap => SensorKind::Tap,
            SensorEvent::Collision { .. } => SensorKind::Collision,
        }
    }
}

/// Everything the transport reports back to the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Feedback {
    /// Battery percentage; values above 100 are clamped.
    Battery { level: u8 },
    /// Link (re)established. A model, when given, replaces the capability model.
    Connected {
        #[serde(default)]
        model: Option<DeviceModel>,
    },
    Disconnected,
    /// The device reported different hardware.
    Capabilities { model: DeviceModel },
    Sensor(SensorEvent),
}

impl Feedback {
    pub fn battery(level: u8) -> Self {
        Feedback::Battery {
            level: level.min(100),
        }
    }
}

/// Request to add a runtime tool to the capability model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRegistration {
    pub name: String,
    pub channels: ChannelSet,
}

/// What a virtual input device reports to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum InputReading {
    Knob { value: f32 },
    /// Both axes in `-1.0..=1.0`.
    Joystick { x: f32, y: f32 },
    Button { pressed: bool },
}

/// Degrees of tilt that map to a full joystick deflection.
const FULL_DEFLECTION_DEG: f32 = 45.0;

/// Per-demand state of a virtual input device.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InputState {
    /// Unquantised knob position.
    knob: f32,
}

impl InputState {
    pub(crate) fn new(device: &InputDevice) -> Self {
        let knob = match device {
            InputDevice::Knob { min, .. } => *min,
            _ => 0.0,
        };
        Self { knob }
    }

    /// Fold one sample into the device state and produce a reading, if the
    /// device listens to this sensor.
    pub(crate) fn apply(&mut self, device: &InputDevice, sample: &SensorEvent) -> Option<InputReading> {
        if !device.listens_to(sample.kind()) {
            return None;
        }

        match (device, sample) {
            (InputDevice::Knob { min, max, step }, SensorEvent::Rotation { degrees }) => {
                let (lo, hi) = if min <= max { (*min, *max) } else { (*max, *min) };
                // One full turn sweeps the whole range.
                self.knob = (self.knob + degrees / 360.0 * (hi - lo)).clamp(lo, hi);
                let value = if *step > 0.0 {
                    (lo + ((self.knob - lo) / step).round() * step).clamp(lo, hi)
                } else {
                    self.knob
                };
                Some(InputReading::Knob { value })
            }
            (InputDevice::Joystick, SensorEvent::Tilt { pitch, roll }) => Some(InputReading::Joystick {
                x: (roll / FULL_DEFLECTION_DEG).clamp(-1.0, 1.0),
                y: (pitch / FULL_DEFLECTION_DEG).clamp(-1.0, 1.0),
            }),
            (InputDevice::Button, SensorEvent::Tap | SensorEvent::Collision { .. }) => {
                Some(InputReading::Button { pressed: true })
            }
            _ => None,
        }
    }
}
