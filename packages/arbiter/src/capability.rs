//! Device capability model.
//!
//! Describes which output channels the attached ball exposes and which
//! runtime-defined tool payloads it can represent. The resolver consults the
//! model before anything else: a payload the device cannot represent is
//! rejected, never silently downgraded.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::demand::Payload;

/// One output channel of the shared device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Led,
    Matrix,
    Motor,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Led, Channel::Matrix, Channel::Motor];

    fn bit(self) -> u8 {
        match self {
            Channel::Led => 0b001,
            Channel::Matrix => 0b010,
            Channel::Motor => 0b100,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Led => write!(f, "led"),
            Channel::Matrix => write!(f, "matrix"),
            Channel::Motor => write!(f, "motor"),
        }
    }
}

/// A set of channels, stored as a bitmask.
///
/// Serializes as a list of channel names so the wire format stays readable.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<Channel>", from = "Vec<Channel>")]
pub struct ChannelSet(u8);

impl ChannelSet {
    pub const EMPTY: ChannelSet = ChannelSet(0);

    pub fn only(channel: Channel) -> Self {
        Self(channel.bit())
    }

    pub fn all() -> Self {
        Channel::ALL.into_iter().collect()
    }

    pub fn with(mut self, channel: Channel) -> Self {
        self.0 |= channel.bit();
        self
    }

    pub fn without(mut self, channel: Channel) -> Self {
        self.0 &= !channel.bit();
        self
    }

    pub fn contains(self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn overlaps(self, other: ChannelSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset_of(self, other: ChannelSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn union(self, other: ChannelSet) -> ChannelSet {
        ChannelSet(self.0 | other.0)
    }

    pub fn intersection(self, other: ChannelSet) -> ChannelSet {
        ChannelSet(self.0 & other.0)
    }

    pub fn difference(self, other: ChannelSet) -> ChannelSet {
        ChannelSet(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Channel> {
        Channel::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        iter.into_iter().fold(ChannelSet::EMPTY, ChannelSet::with)
    }
}

impl From<Vec<Channel>> for ChannelSet {
    fn from(channels: Vec<Channel>) -> Self {
        channels.into_iter().collect()
    }
}

impl From<ChannelSet> for Vec<Channel> {
    fn from(set: ChannelSet) -> Self {
        set.iter().collect()
    }
}

impl fmt::Debug for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for ChannelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Known hardware variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    /// LED, 8x8 matrix and motors.
    Bolt,
    /// LED and motors, no matrix.
    Mini,
    /// Status light only (simulators, LED-only peripherals).
    LedOnly,
}

impl DeviceModel {
    pub fn channels(self) -> ChannelSet {
        match self {
            DeviceModel::Bolt => ChannelSet::all(),
            DeviceModel::Mini => ChannelSet::only(Channel::Led).with(Channel::Motor),
            DeviceModel::LedOnly => ChannelSet::only(Channel::Led),
        }
    }
}

impl std::str::FromStr for DeviceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bolt" => Ok(DeviceModel::Bolt),
            "mini" => Ok(DeviceModel::Mini),
            "led_only" | "led-only" | "led" => Ok(DeviceModel::LedOnly),
            other => Err(format!("unknown device model: {}", other)),
        }
    }
}

/// A runtime-registered tool payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// Channels a payload of this tool needs. A device lacking any of them
    /// cannot represent the tool.
    pub channels: ChannelSet,
}

/// Why a payload cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    MissingChannels(ChannelSet),
    UnknownTool(String),
    ToolChannelMismatch { tool: String, declared: ChannelSet },
    NoChannels,
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsupported::MissingChannels(missing) => {
                write!(f, "device has no {} channel", missing)
            }
            Unsupported::UnknownTool(tool) => write!(f, "tool '{}' is not registered", tool),
            Unsupported::ToolChannelMismatch { tool, declared } => write!(
                f,
                "tool '{}' payload claims {} outside its registered channels",
                tool, declared
            ),
            Unsupported::NoChannels => write!(f, "payload claims no channel"),
        }
    }
}

/// Static description of the attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityModel {
    model: DeviceModel,
    channels: ChannelSet,
    tools: BTreeMap<String, ToolSpec>,
}

impl CapabilityModel {
    pub fn new(model: DeviceModel) -> Self {
        Self {
            model,
            channels: model.channels(),
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool payload shape. Re-registering a name replaces it.
    pub fn register_tool(&mut self, name: impl Into<String>, channels: ChannelSet) {
        let name = name.into();
        self.tools.insert(
            name.clone(),
            ToolSpec {
                name,
                channels,
            },
        );
    }

    pub fn with_tool(mut self, name: impl Into<String>, channels: ChannelSet) -> Self {
        self.register_tool(name, channels);
        self
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolSpec> {
        self.tools.values()
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn channels(&self) -> ChannelSet {
        self.channels
    }

    /// Replace the hardware description, keeping registered tools.
    pub fn set_model(&mut self, model: DeviceModel) {
        self.model = model;
        self.channels = model.channels();
    }

    /// Check whether `payload` can be rendered on this device.
    pub fn check(&self, payload: &Payload) -> Result<ChannelSet, Unsupported> {
        let wanted = payload.channels();
        if wanted.is_empty() {
            return Err(Unsupported::NoChannels);
        }

        if let Payload::Tool(tool) = payload {
            let spec = self
                .tools
                .get(&tool.tool)
                .ok_or_else(|| Unsupported::UnknownTool(tool.tool.clone()))?;
            if !wanted.is_subset_of(spec.channels) {
                return Err(Unsupported::ToolChannelMismatch {
                    tool: tool.tool.clone(),
                    declared: wanted,
                });
            }
        }

        let missing = wanted.difference(self.channels);
        if missing.is_empty() {
            Ok(wanted)
        } else {
            Err(Unsupported::MissingChannels(missing))
        }
    }

    pub fn supports(&self, payload: &Payload) -> bool {
        self.check(payload).is_ok()
    }
}

impl Default for CapabilityModel {
    fn default() -> Self {
        Self::new(DeviceModel::Bolt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::{LedPattern, MatrixContent, Rgb, ToolPayload};

    #[test]
    fn test_channel_set_operations() {
        let led_motor = ChannelSet::only(Channel::Led).with(Channel::Motor);
        assert!(led_motor.contains(Channel::Led));
        assert!(!led_motor.contains(Channel::Matrix));
        assert!(led_motor.overlaps(ChannelSet::only(Channel::Motor)));
        assert!(!led_motor.overlaps(ChannelSet::only(Channel::Matrix)));
        assert!(ChannelSet::only(Channel::Led).is_subset_of(led_motor));
        assert_eq!(led_motor.difference(ChannelSet::only(Channel::Led)), ChannelSet::only(Channel::Motor));
        assert_eq!(led_motor.iter().collect::<Vec<_>>(), vec![Channel::Led, Channel::Motor]);
    }

    #[test]
    fn test_channel_set_serializes_as_list() {
        let set = ChannelSet::only(Channel::Matrix).with(Channel::Led);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["led","matrix"]"#);

        let back: ChannelSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_mini_rejects_matrix_text() {
        let model = CapabilityModel::new(DeviceModel::Mini);
        let payload = Payload::Matrix(MatrixContent::Text {
            text: "hi".to_string(),
            color: Rgb::WHITE,
        });

        assert_eq!(
            model.check(&payload),
            Err(Unsupported::MissingChannels(ChannelSet::only(Channel::Matrix)))
        );
        assert!(model.supports(&Payload::Led(LedPattern::solid(Rgb::GREEN))));
    }

    #[test]
    fn test_unregistered_tool_is_unsupported() {
        let model = CapabilityModel::default();
        let payload = Payload::Tool(ToolPayload {
            tool: "metronome".to_string(),
            channels: ChannelSet::only(Channel::Led),
            data: serde_json::json!({"bpm": 90}),
        });

        assert_eq!(
            model.check(&payload),
            Err(Unsupported::UnknownTool("metronome".to_string()))
        );

        let model = model.with_tool("metronome", ChannelSet::only(Channel::Led).with(Channel::Motor));
        assert_eq!(model.check(&payload), Ok(ChannelSet::only(Channel::Led)));
    }

    #[test]
    fn test_tool_cannot_claim_unregistered_channels() {
        let model = CapabilityModel::default().with_tool("metronome", ChannelSet::only(Channel::Led));
        let payload = Payload::Tool(ToolPayload {
            tool: "metronome".to_string(),
            channels: ChannelSet::only(Channel::Led).with(Channel::Motor),
            data: serde_json::Value::Null,
        });

        assert!(matches!(
            model.check(&payload),
            Err(Unsupported::ToolChannelMismatch { .. })
        ));
    }

    #[test]
    fn test_set_model_keeps_tools() {
        let mut model = CapabilityModel::default().with_tool("dial", ChannelSet::only(Channel::Motor));
        model.set_model(DeviceModel::LedOnly);

        assert_eq!(model.channels(), ChannelSet::only(Channel::Led));
        assert!(model.tool("dial").is_some());
    }

    #[test]
    fn test_device_model_from_str() {
        assert_eq!("bolt".parse::<DeviceModel>(), Ok(DeviceModel::Bolt));
        assert_eq!("LED-only".parse::<DeviceModel>(), Ok(DeviceModel::LedOnly));
        assert!("sprk".parse::<DeviceModel>().is_err());
    }
}
