//! Demands: requests for time on the shared device.
//!
//! A [`Demand`] is a plain value. It carries everything the resolver, guard
//! and composer need (priority, span, exclusivity, payload) and nothing about
//! who produced it. Producers keep the [`DemandHandle`] returned at submission;
//! it is the only way to cancel the demand later.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::{Channel, ChannelSet};

/// Unique identity of a submitted demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DemandHandle(Uuid);

impl DemandHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DemandHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DemandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemandKind {
    Expression,
    Input,
    Reaction,
    StatusSignal,
}

impl fmt::Display for DemandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemandKind::Expression => write!(f, "expression"),
            DemandKind::Input => write!(f, "input"),
            DemandKind::Reaction => write!(f, "reaction"),
            DemandKind::StatusSignal => write!(f, "status_signal"),
        }
    }
}

/// How long a demand wants the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Span {
    /// Bounded; the clock starts when the demand is admitted.
    OneShot(#[serde(with = "duration_ms")] Duration),
    /// Open-ended until explicitly cancelled.
    Continuous,
}

impl Span {
    pub fn is_continuous(&self) -> bool {
        matches!(self, Span::Continuous)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusivity {
    Exclusive,
    Composable,
}

/// 24-bit colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const RED: Rgb = Rgb::new(255, 0, 0);
    pub const GREEN: Rgb = Rgb::new(0, 255, 0);
    pub const BLUE: Rgb = Rgb::new(0, 0, 255);
    pub const ORANGE: Rgb = Rgb::new(255, 165, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale every component by `factor`, clamped to `0.0..=1.0`.
    pub fn scaled(self, factor: f32) -> Self {
        let factor = factor.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * factor) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternStyle {
    Solid,
    Pulse,
    Breathe,
    Rainbow,
    Sparkle,
    Wave,
    Heartbeat,
    ThinkingDots,
    Celebration,
    Alert,
    Flash,
}

impl PatternStyle {
    /// Default animation speed multiplier for the style.
    pub fn default_speed(self) -> f32 {
        match self {
            PatternStyle::Solid => 0.0,
            PatternStyle::Pulse | PatternStyle::Heartbeat => 1.0,
            PatternStyle::Breathe => 0.5,
            PatternStyle::Rainbow => 1.5,
            PatternStyle::Sparkle => 2.0,
            PatternStyle::Wave => 1.2,
            PatternStyle::ThinkingDots => 0.8,
            PatternStyle::Celebration => 3.0,
            PatternStyle::Alert | PatternStyle::Flash => 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedPattern {
    pub style: PatternStyle,
    pub colors: Vec<Rgb>,
    pub speed: f32,
}

impl LedPattern {
    pub fn new(style: PatternStyle, colors: Vec<Rgb>) -> Self {
        Self {
            style,
            colors,
            speed: style.default_speed(),
        }
    }

    pub fn solid(color: Rgb) -> Self {
        Self::new(PatternStyle::Solid, vec![color])
    }

    pub fn pulse(color: Rgb) -> Self {
        Self::new(PatternStyle::Pulse, vec![color])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content", rename_all = "snake_case")]
pub enum MatrixContent {
    Text { text: String, color: Rgb },
    Glyph { name: String, color: Rgb },
    /// Row-major 8x8 frame.
    Frame { pixels: Vec<Rgb> },
}

/// Movement request. `speed` is on the device's native 0-255 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionVector {
    pub heading: u16,
    pub speed: u8,
}

impl MotionVector {
    pub fn new(heading: u16, speed: u8) -> Self {
        Self {
            heading: heading % 360,
            speed,
        }
    }

    /// Build from a 0-100 speed percentage.
    pub fn from_percent(heading: u16, percent: u8) -> Self {
        let percent = percent.min(100) as f32;
        Self::new(heading, (percent * 2.55) as u8)
    }

    /// In-place rotation, used by spin-style expressions.
    pub fn spin(speed: u8) -> Self {
        Self { heading: 0, speed }
    }
}

/// Which sensor stream a virtual input device consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Rotation,
    Tilt,
    Tap,
    Collision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum InputDevice {
    /// Spin the ball to move a value between `min` and `max`.
    Knob { min: f32, max: f32, step: f32 },
    /// Tilt the ball like a joystick.
    Joystick,
    /// Tap the ball as a button.
    Button,
}

impl InputDevice {
    pub fn listens_to(&self, sensor: SensorKind) -> bool {
        matches!(
            (self, sensor),
            (InputDevice::Knob { .. }, SensorKind::Rotation)
                | (InputDevice::Joystick, SensorKind::Tilt)
                | (InputDevice::Button, SensorKind::Tap)
                | (InputDevice::Button, SensorKind::Collision)
        )
    }
}

/// Payload of a tool defined at runtime by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub tool: String,
    pub channels: ChannelSet,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// What the demand wants the device to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Led(LedPattern),
    Matrix(MatrixContent),
    Motion(MotionVector),
    Input(InputDevice),
    Tool(ToolPayload),
}

impl Payload {
    /// Channels this payload claims.
    pub fn channels(&self) -> ChannelSet {
        match self {
            Payload::Led(_) => ChannelSet::only(Channel::Led),
            Payload::Matrix(_) => ChannelSet::only(Channel::Matrix),
            Payload::Motion(_) | Payload::Input(_) => ChannelSet::only(Channel::Motor),
            Payload::Tool(tool) => tool.channels,
        }
    }

    pub fn drives_motor(&self) -> bool {
        self.channels().contains(Channel::Motor)
    }
}

/// One request for device time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub kind: DemandKind,
    pub priority: i32,
    pub span: Span,
    pub exclusivity: Exclusivity,
    #[serde(default)]
    pub override_safety: bool,
    pub payload: Payload,
}

impl Demand {
    pub fn new(kind: DemandKind, payload: Payload) -> Self {
        Self {
            kind,
            priority: 0,
            span: Span::OneShot(Duration::from_secs(3)),
            exclusivity: Exclusivity::Composable,
            override_safety: false,
            payload,
        }
    }

    pub fn expression(pattern: LedPattern) -> Self {
        Self::new(DemandKind::Expression, Payload::Led(pattern))
    }

    /// A continuous, exclusive virtual input device.
    pub fn input(device: InputDevice) -> Self {
        Self::new(DemandKind::Input, Payload::Input(device))
            .exclusive()
            .continuous()
    }

    pub fn motion(motion: MotionVector) -> Self {
        Self::new(DemandKind::Reaction, Payload::Motion(motion))
            .exclusive()
            .for_duration(Duration::from_secs(2))
    }

    pub fn status(pattern: LedPattern) -> Self {
        Self::new(DemandKind::StatusSignal, Payload::Led(pattern))
    }

    pub fn with_kind(mut self, kind: DemandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_duration(mut self, duration: Duration) -> Self {
        self.span = Span::OneShot(duration);
        self
    }

    pub fn continuous(mut self) -> Self {
        self.span = Span::Continuous;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusivity = Exclusivity::Exclusive;
        self
    }

    pub fn composable(mut self) -> Self {
        self.exclusivity = Exclusivity::Composable;
        self
    }

    pub fn override_safety(mut self) -> Self {
        self.override_safety = true;
        self
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusivity == Exclusivity::Exclusive
    }

    pub fn is_continuous(&self) -> bool {
        self.span.is_continuous()
    }

    pub fn channels(&self) -> ChannelSet {
        self.payload.channels()
    }

    pub fn drives_motor(&self) -> bool {
        self.payload.drives_motor()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
