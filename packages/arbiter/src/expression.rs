//! Ready-made expression and status demands.
//!
//! Producers that think in emotions or assistant states rather than LED
//! patterns use these to build demands with consistent colours, patterns and
//! priorities. An [`ExpressionContext`] tones expressions down for the
//! surroundings and an [`ExpressionLog`] keeps what was expressed.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::demand::{Demand, DemandHandle, LedPattern, PatternStyle, Payload, Rgb};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    Excited,
    Calm,
    Focused,
    Thinking,
    Confused,
    Concerned,
    Celebrating,
    Working,
    Listening,
}

impl Emotion {
    pub const ALL: [Emotion; 10] = [
        Emotion::Happy,
        Emotion::Excited,
        Emotion::Calm,
        Emotion::Focused,
        Emotion::Thinking,
        Emotion::Confused,
        Emotion::Concerned,
        Emotion::Celebrating,
        Emotion::Working,
        Emotion::Listening,
    ];

    pub fn palette(self) -> &'static [Rgb] {
        const HAPPY: &[Rgb] = &[Rgb::new(255, 255, 0), Rgb::new(255, 165, 0), Rgb::new(255, 192, 203)];
        const EXCITED: &[Rgb] = &[Rgb::new(255, 0, 255), Rgb::new(255, 20, 147), Rgb::new(255, 69, 0)];
        const CALM: &[Rgb] = &[Rgb::new(0, 191, 255), Rgb::new(135, 206, 235), Rgb::new(173, 216, 230)];
        const FOCUSED: &[Rgb] = &[Rgb::new(0, 255, 0), Rgb::new(50, 205, 50), Rgb::new(34, 139, 34)];
        const THINKING: &[Rgb] = &[Rgb::new(138, 43, 226), Rgb::new(147, 112, 219), Rgb::new(186, 85, 211)];
        const CONFUSED: &[Rgb] = &[Rgb::new(255, 165, 0), Rgb::new(255, 140, 0), Rgb::new(255, 215, 0)];
        const CONCERNED: &[Rgb] = &[Rgb::new(255, 255, 0), Rgb::new(255, 215, 0), Rgb::new(255, 69, 0)];
        const CELEBRATING: &[Rgb] = &[
            Rgb::new(255, 0, 255),
            Rgb::new(0, 255, 255),
            Rgb::new(255, 255, 0),
            Rgb::new(255, 0, 0),
            Rgb::new(0, 255, 0),
            Rgb::new(0, 0, 255),
        ];
        const WORKING: &[Rgb] = &[Rgb::new(0, 100, 255), Rgb::new(0, 150, 255), Rgb::new(0, 200, 255)];
        const LISTENING: &[Rgb] = &[Rgb::new(255, 255, 255), Rgb::new(200, 200, 255), Rgb::new(150, 150, 255)];

        match self {
            Emotion::Happy => HAPPY,
            Emotion::Excited => EXCITED,
            Emotion::Calm => CALM,
            Emotion::Focused => FOCUSED,
            Emotion::Thinking => THINKING,
            Emotion::Confused => CONFUSED,
            Emotion::Concerned => CONCERNED,
            Emotion::Celebrating => CELEBRATING,
            Emotion::Working => WORKING,
            Emotion::Listening => LISTENING,
        }
    }

    /// Candidate patterns, most characteristic first.
    pub fn patterns(self) -> [PatternStyle; 2] {
        use PatternStyle::*;
        match self {
            Emotion::Happy => [Pulse, Sparkle],
            Emotion::Excited => [Celebration, Rainbow],
            Emotion::Calm => [Breathe, Wave],
            Emotion::Focused => [Solid, Pulse],
            Emotion::Thinking => [ThinkingDots, Pulse],
            Emotion::Confused => [Sparkle, Wave],
            Emotion::Concerned => [Alert, Pulse],
            Emotion::Celebrating => [Celebration, Rainbow],
            Emotion::Working => [Wave, Pulse],
            Emotion::Listening => [Breathe, Pulse],
        }
    }

    fn urgency(self) -> i32 {
        match self {
            Emotion::Concerned => 8,
            Emotion::Celebrating => 7,
            Emotion::Excited | Emotion::Confused => 6,
            Emotion::Happy => 5,
            Emotion::Working | Emotion::Thinking => 4,
            Emotion::Focused | Emotion::Listening => 3,
            Emotion::Calm => 2,
        }
    }

    /// Priority in `1..=10`: urgency plus up to two for intensity.
    pub fn priority(self, intensity: f32) -> i32 {
        let intensity = intensity.clamp(0.0, 1.0);
        (self.urgency() + (intensity * 2.0) as i32).clamp(1, 10)
    }

    /// Pick a pattern for the given intensity: dynamic patterns when
    /// intense, subtle ones when faint.
    pub fn pattern_for(self, intensity: f32) -> PatternStyle {
        use PatternStyle::*;
        let candidates = self.patterns();
        let preferred: &[PatternStyle] = if intensity > 0.8 {
            &[Celebration, Rainbow, Sparkle, Alert]
        } else if intensity < 0.3 {
            &[Solid, Breathe, Pulse]
        } else {
            &[]
        };
        candidates
            .iter()
            .copied()
            .find(|p| preferred.contains(p))
            .unwrap_or(candidates[0])
    }

    /// LED pattern with the palette scaled by `intensity`.
    pub fn led_pattern(self, intensity: f32) -> LedPattern {
        let intensity = intensity.clamp(0.0, 1.0);
        let colors = self.palette().iter().map(|c| c.scaled(intensity)).collect();
        LedPattern::new(self.pattern_for(intensity), colors)
    }

    /// Expression demand for this emotion. `None` keeps it up until cancelled.
    pub fn demand(self, intensity: f32, duration: Option<Duration>) -> Demand {
        self.demand_in(intensity, duration, &ExpressionContext::default())
    }

    /// Like [`Emotion::demand`], adapted to `context`.
    pub fn demand_in(
        self,
        intensity: f32,
        duration: Option<Duration>,
        context: &ExpressionContext,
    ) -> Demand {
        let pattern = context.adapt(self.led_pattern(intensity));
        let demand = Demand::expression(pattern).with_priority(self.priority(intensity));
        match duration {
            Some(duration) => demand.for_duration(duration),
            None => demand.continuous(),
        }
    }
}

/// What the assistant is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    Processing,
    Idle,
    Learning,
    Responding,
    Listening,
    Analyzing,
    Creating,
    Helping,
    Error,
}

/// Intensity used for assistant state expressions.
const STATE_INTENSITY: f32 = 0.7;

impl AssistantState {
    pub fn emotion(self) -> (Emotion, PatternStyle) {
        match self {
            AssistantState::Processing => (Emotion::Thinking, PatternStyle::ThinkingDots),
            AssistantState::Idle => (Emotion::Calm, PatternStyle::Breathe),
            AssistantState::Learning => (Emotion::Focused, PatternStyle::Wave),
            AssistantState::Responding => (Emotion::Working, PatternStyle::Pulse),
            AssistantState::Listening => (Emotion::Listening, PatternStyle::Breathe),
            AssistantState::Analyzing => (Emotion::Focused, PatternStyle::Sparkle),
            AssistantState::Creating => (Emotion::Excited, PatternStyle::Rainbow),
            AssistantState::Helping => (Emotion::Happy, PatternStyle::Pulse),
            AssistantState::Error => (Emotion::Concerned, PatternStyle::Alert),
        }
    }

    /// `None` for states that last until the assistant moves on.
    pub fn duration(self) -> Option<Duration> {
        let secs = match self {
            AssistantState::Processing | AssistantState::Idle | AssistantState::Listening => {
                return None
            }
            AssistantState::Learning => 10,
            AssistantState::Responding => 5,
            AssistantState::Analyzing => 8,
            AssistantState::Creating => 15,
            AssistantState::Helping => 3,
            AssistantState::Error => 2,
        };
        Some(Duration::from_secs(secs))
    }

    pub fn demand(self) -> Demand {
        self.demand_in(&ExpressionContext::default())
    }

    pub fn demand_in(self, context: &ExpressionContext) -> Demand {
        let (emotion, style) = self.emotion();
        let colors = emotion
            .palette()
            .iter()
            .map(|c| c.scaled(STATE_INTENSITY))
            .collect();
        let demand = Demand::expression(context.adapt(LedPattern::new(style, colors)))
            .with_priority(emotion.priority(STATE_INTENSITY));
        match self.duration() {
            Some(duration) => demand.for_duration(duration),
            None => demand.continuous(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notification {
    Success,
    Warning,
    Error,
    Info,
}

/// How long a notification flash stays up.
pub const NOTIFICATION_FLASH: Duration = Duration::from_millis(500);

impl Notification {
    pub fn color(self) -> Rgb {
        match self {
            Notification::Success => Rgb::GREEN,
            Notification::Warning => Rgb::ORANGE,
            Notification::Error => Rgb::RED,
            Notification::Info => Rgb::BLUE,
        }
    }

    pub fn priority(self) -> i32 {
        match self {
            Notification::Error => 9,
            Notification::Warning => 7,
            Notification::Success => 5,
            Notification::Info => 4,
        }
    }

    /// A short status flash.
    pub fn demand(self) -> Demand {
        Demand::status(LedPattern::new(PatternStyle::Flash, vec![self.color()]))
            .with_priority(self.priority())
            .for_duration(NOTIFICATION_FLASH)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Kind of message the assistant wants to get across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Success,
    Warning,
    Error,
    Thinking,
    Working,
    Listening,
    Celebrating,
}

/// Message urgency runs from 1 to 10.
pub const MAX_URGENCY: u8 = 10;

/// Message expression length at urgency 5 for a 50 character message.
const MESSAGE_BASE: Duration = Duration::from_secs(3);

/// Short or empty messages still show for at least this long.
pub const MIN_MESSAGE_DURATION: Duration = NOTIFICATION_FLASH;

impl MessageKind {
    pub fn expression(self) -> (Emotion, PatternStyle) {
        match self {
            MessageKind::Info => (Emotion::Calm, PatternStyle::Pulse),
            MessageKind::Success => (Emotion::Happy, PatternStyle::Celebration),
            MessageKind::Warning | MessageKind::Error => (Emotion::Concerned, PatternStyle::Alert),
            MessageKind::Thinking => (Emotion::Thinking, PatternStyle::ThinkingDots),
            MessageKind::Working => (Emotion::Working, PatternStyle::Wave),
            MessageKind::Listening => (Emotion::Listening, PatternStyle::Breathe),
            MessageKind::Celebrating => (Emotion::Celebrating, PatternStyle::Celebration),
        }
    }

    /// One-shot expression for a message. Longer and more urgent messages
    /// stay up longer: the base length scales with `urgency / 5` and with
    /// the content length over 50 characters, capped at twice.
    pub fn demand(self, content: &str, urgency: u8, context: &ExpressionContext) -> Demand {
        let urgency = urgency.clamp(1, MAX_URGENCY);
        let intensity = urgency as f32 / MAX_URGENCY as f32;
        let (emotion, style) = self.expression();

        let colors = emotion.palette().iter().map(|c| c.scaled(intensity)).collect();
        Demand::expression(context.adapt(LedPattern::new(style, colors)))
            .with_priority(emotion.priority(intensity))
            .for_duration(message_duration(content, urgency))
    }
}

pub fn message_duration(content: &str, urgency: u8) -> Duration {
    let urgency_factor = urgency.clamp(1, MAX_URGENCY) as f32 / 5.0;
    let length_factor = (content.chars().count() as f32 / 50.0).min(2.0);
    MESSAGE_BASE
        .mul_f32(urgency_factor * length_factor)
        .max(MIN_MESSAGE_DURATION)
}

// =============================================================================
// Context
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    #[default]
    Day,
    Night,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserActivity {
    #[default]
    Unknown,
    FocusedWork,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemLoad {
    #[default]
    Normal,
    High,
}

/// Surroundings that tone expressions down. The default changes nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionContext {
    pub time_of_day: TimeOfDay,
    pub user_activity: UserActivity,
    pub system_load: SystemLoad,
}

impl ExpressionContext {
    /// Adapt `pattern` to the context.
    ///
    /// Night halves the brightness and turns loud patterns into a breathe.
    /// Focused work dims to 70% and swaps showy patterns for a pulse. A
    /// loaded system gets a solid colour instead of busy animations. Each
    /// rule looks at the requested style; later rules win.
    pub fn adapt(&self, pattern: LedPattern) -> LedPattern {
        use PatternStyle::*;
        let requested = pattern.style;
        let mut style = requested;
        let mut colors = pattern.colors;

        if self.time_of_day == TimeOfDay::Night {
            colors = colors.into_iter().map(|c| c.scaled(0.5)).collect();
            if matches!(requested, Celebration | Alert) {
                style = Breathe;
            }
        }
        if self.user_activity == UserActivity::FocusedWork {
            colors = colors.into_iter().map(|c| c.scaled(0.7)).collect();
            if matches!(requested, Celebration | Rainbow) {
                style = Pulse;
            }
        }
        if self.system_load == SystemLoad::High
            && matches!(requested, Celebration | Rainbow | Sparkle)
        {
            style = Solid;
        }

        if style == requested {
            LedPattern {
                colors,
                ..pattern
            }
        } else {
            LedPattern::new(style, colors)
        }
    }
}

// =============================================================================
// History
// =============================================================================

/// How many expressions an [`ExpressionLog`] keeps by default.
pub const DEFAULT_HISTORY: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRecord {
    pub handle: DemandHandle,
    pub emotion: Emotion,
    pub style: PatternStyle,
    pub priority: i32,
    pub context: ExpressionContext,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionStats {
    pub total: usize,
    /// Share of each emotion in the history, summing to one.
    pub emotions: BTreeMap<Emotion, f64>,
    pub patterns: BTreeMap<PatternStyle, f64>,
    pub most_common_emotion: Option<Emotion>,
    pub most_common_pattern: Option<PatternStyle>,
}

/// Bounded history of expressions handed to the loop, oldest first.
#[derive(Debug, Clone)]
pub struct ExpressionLog {
    records: VecDeque<ExpressionRecord>,
    capacity: usize,
}

impl Default for ExpressionLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }
}

impl ExpressionLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record an expression demand. Demands that do not drive the LED are
    /// not expressions and are ignored.
    pub fn record(
        &mut self,
        handle: DemandHandle,
        emotion: Emotion,
        demand: &Demand,
        context: ExpressionContext,
    ) {
        let Payload::Led(pattern) = &demand.payload else {
            return;
        };
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(ExpressionRecord {
            handle,
            emotion,
            style: pattern.style,
            priority: demand.priority,
            context,
            at: Utc::now(),
        });
    }

    /// The last `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ExpressionRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn stats(&self) -> ExpressionStats {
        let mut emotions: BTreeMap<Emotion, usize> = BTreeMap::new();
        let mut patterns: BTreeMap<PatternStyle, usize> = BTreeMap::new();
        for record in &self.records {
            *emotions.entry(record.emotion).or_default() += 1;
            *patterns.entry(record.style).or_default() += 1;
        }

        let total = self.records.len();
        let share = |count: usize| count as f64 / total as f64;
        ExpressionStats {
            total,
            most_common_emotion: most_common(&emotions),
            most_common_pattern: most_common(&patterns),
            emotions: emotions.into_iter().map(|(k, n)| (k, share(n))).collect(),
            patterns: patterns.into_iter().map(|(k, n)| (k, share(n))).collect(),
        }
    }
}

/// Highest count; the first key in order wins a tie.
fn most_common<K: Copy + Ord>(counts: &BTreeMap<K, usize>) -> Option<K> {
    counts
        .iter()
        .fold(None, |best: Option<(K, usize)>, (&key, &count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((key, count)),
        })
        .map(|(key, _)| key)
}
