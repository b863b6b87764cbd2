// src/trigger/mod.rs

//! Trigger policies: when does a sheet execute, and how does it consume
//! messages?
//!
//! Every policy implements [`TriggerPolicy`]. The sheet drives it in three
//! phases per step:
//!
//! 1. [`pre_process`](TriggerPolicy::pre_process) looks at the
//!    [`TriggerContext`] (time, pending messages, explicit commands) and
//!    activates the trigger if its condition holds. Activation is monotonic
//!    within a cycle.
//! 2. [`is_triggered`](TriggerPolicy::is_triggered) tells the sheet whether to
//!    step.
//! 3. [`post_process`](TriggerPolicy::post_process) clears the
//!    "fulfilled this cycle" flag and deactivates non-endless triggers.
//!
//! Variants live in their own modules; [`build_trigger`] is the factory used
//! by sheets whenever their trigger settings change.

pub mod arrival;
pub mod continuous;
pub mod execute;
pub mod lifecycle;
pub mod once;
pub mod timer;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use arrival::ArrivalTrigger;
pub use continuous::{ContinuousTrigger, NeverTrigger};
pub use execute::ExecuteTrigger;
pub use lifecycle::LifecycleTrigger;
pub use once::OnceTrigger;
pub use timer::TimerTrigger;

/// Trigger kinds as they appear in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    /// Step on every machine cycle.
    Continuously,
    /// Never step automatically.
    None,
    /// Step when a message arrives in the inbox.
    Arrival,
    /// Step every `interval`.
    Timer,
    /// Step after a random delay in `[0, 2 * interval)`.
    Random,
    /// Step when the machine starts.
    Start,
    /// Step when the machine stops.
    Stop,
    /// Step on both machine start and stop.
    StartStop,
    /// Step only when explicitly executed.
    Execute,
    /// Step exactly once per machine run.
    Once,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerType::Continuously => "continuously",
            TriggerType::None => "none",
            TriggerType::Arrival => "arrival",
            TriggerType::Timer => "timer",
            TriggerType::Random => "random",
            TriggerType::Start => "start",
            TriggerType::Stop => "stop",
            TriggerType::StartStop => "startstop",
            TriggerType::Execute => "execute",
            TriggerType::Once => "once",
        };
        f.write_str(s)
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continuously" => Ok(TriggerType::Continuously),
            "none" => Ok(TriggerType::None),
            "arrival" => Ok(TriggerType::Arrival),
            "timer" => Ok(TriggerType::Timer),
            "random" => Ok(TriggerType::Random),
            "start" => Ok(TriggerType::Start),
            "stop" => Ok(TriggerType::Stop),
            "startstop" => Ok(TriggerType::StartStop),
            "execute" => Ok(TriggerType::Execute),
            "once" => Ok(TriggerType::Once),
            other => Err(format!("invalid trigger type: {other}")),
        }
    }
}

/// Repeat mode of a trigger.
///
/// - `Once`: after firing, the trigger deactivates until its condition holds
///   again.
/// - `Endless`: after firing, the trigger stays active and fires on every
///   subsequent step until [`TriggerPolicy::stop`] is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    Once,
    Endless,
}

/// Unit of [`TriggerConfig::interval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalUnit {
    #[default]
    Ms,
    S,
    M,
    H,
    D,
}

impl IntervalUnit {
    pub fn millis(self) -> u64 {
        match self {
            IntervalUnit::Ms => 1,
            IntervalUnit::S => 1_000,
            IntervalUnit::M => 60 * 1_000,
            IntervalUnit::H => 60 * 60 * 1_000,
            IntervalUnit::D => 24 * 60 * 60 * 1_000,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ms" => Ok(IntervalUnit::Ms),
            "s" => Ok(IntervalUnit::S),
            "m" => Ok(IntervalUnit::M),
            "h" => Ok(IntervalUnit::H),
            "d" => Ok(IntervalUnit::D),
            other => Err(format!(
                "unsupported interval unit '{other}'; expected ms, s, m, h or d"
            )),
        }
    }
}

/// Trigger settings, e.g.
///
/// ```json
/// { "type": "timer", "repeat": "once", "interval": 2, "intervalUnit": "s", "start": 1700000000000 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub kind: TriggerType,

    #[serde(default)]
    pub repeat: Repeat,

    /// Interval for timer/random triggers, in `interval_unit`s.
    #[serde(default)]
    pub interval: Option<u64>,

    #[serde(default)]
    pub interval_unit: IntervalUnit,

    /// Earliest firing time for timer/random triggers (unix ms).
    #[serde(default)]
    pub start: Option<u64>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self::new(TriggerType::Continuously, Repeat::Once)
    }
}

impl TriggerConfig {
    pub fn new(kind: TriggerType, repeat: Repeat) -> Self {
        Self {
            kind,
            repeat,
            interval: None,
            interval_unit: IntervalUnit::Ms,
            start: None,
        }
    }

    pub fn with_interval(mut self, interval: u64, unit: IntervalUnit) -> Self {
        self.interval = Some(interval);
        self.interval_unit = unit;
        self
    }

    pub fn with_start(mut self, start_ms: u64) -> Self {
        self.start = Some(start_ms);
        self
    }

    pub fn is_endless(&self) -> bool {
        self.repeat == Repeat::Endless
    }

    /// Interval in milliseconds (defaults to one unit, never zero).
    pub fn interval_ms(&self) -> u64 {
        self.interval
            .unwrap_or(1)
            .saturating_mul(self.interval_unit.millis())
            .max(1)
    }
}

/// Explicit commands a trigger can be fulfilled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCommand {
    Execute,
}

/// What a trigger gets to see when deciding eligibility.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerContext {
    /// Current time (unix ms).
    pub now_ms: u64,
    /// The sheet has a message that still needs processing (an attached,
    /// not fully looped message, or a queued unattached one).
    pub has_pending_message: bool,
    /// Explicit command carried by this step, if any.
    pub command: Option<TriggerCommand>,
    /// Step requested manually (`Machine::step`); time gates are bypassed.
    pub manual: bool,
}

/// Shared active/fulfilled bookkeeping used by most variants.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Activation {
    pub(crate) active: bool,
    pub(crate) fulfilled: bool,
}

impl Activation {
    pub(crate) fn fulfil(&mut self) {
        self.active = true;
        self.fulfilled = true;
    }

    pub(crate) fn triggered(&self, endless: bool) -> bool {
        self.active && (self.fulfilled || endless)
    }

    pub(crate) fn settle(&mut self, endless: bool) {
        self.fulfilled = false;
        if !endless {
            self.active = false;
        }
    }

    pub(crate) fn stop(&mut self) -> bool {
        let was_running = self.active || self.fulfilled;
        self.active = false;
        self.fulfilled = false;
        was_running
    }
}

/// Strategy deciding whether and how a sheet steps.
pub trait TriggerPolicy: fmt::Debug + Send {
    fn config(&self) -> &TriggerConfig;

    fn kind(&self) -> TriggerType {
        self.config().kind
    }

    fn is_endless(&self) -> bool {
        self.config().is_endless()
    }

    fn is_active(&self) -> bool;

    /// Evaluate the external condition and activate if it holds.
    fn pre_process(&mut self, ctx: &TriggerContext);

    /// Whether the owning sheet should step now.
    fn is_triggered(&self) -> bool;

    /// Clear per-cycle flags; non-endless triggers deactivate.
    fn post_process(&mut self, ctx: &TriggerContext);

    /// Stop an active (typically endless) run. Returns `true` if the trigger
    /// was running.
    fn stop(&mut self) -> bool;

    /// Keep the attached message across firings instead of taking a new one.
    fn reuses_message(&self) -> bool {
        false
    }

    /// Machine transitioned from stopped to running.
    fn on_machine_start(&mut self, _now_ms: u64) {}

    /// Machine was asked to stop.
    fn on_machine_stop(&mut self) {}

    /// While `true`, the machine must not settle into `Stopped`.
    fn prevents_stop(&self) -> bool {
        false
    }

    /// Called at each cycle boundary before any sheet steps.
    fn on_cycle_start(&mut self) {}

    /// The step carried by `ctx` would fire this trigger a second time within
    /// the same cycle.
    fn would_double_fire(&self, _ctx: &TriggerContext) -> bool {
        false
    }

    /// Puts into the sheet inbox should schedule a step outside the cycle.
    fn is_out_of_cycle(&self) -> bool {
        false
    }
}

/// Construct the policy for `config`.
pub fn build_trigger(config: &TriggerConfig) -> Box<dyn TriggerPolicy> {
    let config = config.clone();
    match config.kind {
        TriggerType::Continuously => Box::new(ContinuousTrigger::new(config)),
        TriggerType::None => Box::new(NeverTrigger::new(config)),
        TriggerType::Arrival => Box::new(ArrivalTrigger::new(config)),
        TriggerType::Timer => Box::new(TimerTrigger::new(config)),
        TriggerType::Random => Box::new(TimerTrigger::random(config)),
        TriggerType::Start | TriggerType::Stop | TriggerType::StartStop => {
            Box::new(LifecycleTrigger::new(config))
        }
        TriggerType::Execute => Box::new(ExecuteTrigger::new(config)),
        TriggerType::Once => Box::new(OnceTrigger::new(config)),
    }
}
