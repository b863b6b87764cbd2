// src/sheet/mod.rs

//! Sheets: the per-unit reactive computations a machine schedules.
//!
//! - [`unit`] holds [`SheetUnit`] and its step algorithm.
//! - [`processor`] is the evaluation seam ([`SheetProcessor`]).

pub mod processor;
pub mod unit;

use serde::Serialize;

pub use processor::{
    DiscardProcessor, ForwardProcessor, ProcessContext, ProcessError, ProcessOutcome,
    ProcessorKind, SheetProcessor, build_processor,
};
pub use unit::{SheetUnit, StepRequest};

use crate::message::MessageId;
use crate::trigger::{Repeat, TriggerType};

/// Canonical sheet id type.
pub type SheetId = String;

/// Processing state of a sheet.
///
/// `Active` is the resting state. The others are transitions left behind by
/// the last evaluation:
///
/// - `Paused`: skip steps until resumed
/// - `Resumed`: next step continues in place, regardless of the trigger
/// - `Repeat`: next step re-evaluates the same message
/// - `Continue`: next step continues in place without advancing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetState {
    #[default]
    Active,
    Paused,
    Resumed,
    Repeat,
    Continue,
}

/// Per-sheet counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetStats {
    pub steps: u64,
    pub execute_steps: u64,
    pub repeat_steps: u64,
    /// Messages attached so far.
    pub messages: u64,
}

/// Side effects of a sheet step that the machine has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetEvent {
    Attached {
        message_id: MessageId,
    },
    Detached {
        message_id: MessageId,
    },
    /// Message left the inbox. `acknowledge` is set when the queue store
    /// delivered it and is owed a credit back.
    Popped {
        message_id: MessageId,
        acknowledge: bool,
    },
}

/// Serializable view of a sheet for state requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSnapshot {
    pub id: SheetId,
    pub name: String,
    pub state: SheetState,
    pub trigger: TriggerType,
    pub repeat: Repeat,
    pub trigger_active: bool,
    pub stats: SheetStats,
    pub inbox_size: usize,
    pub queue_backlog: usize,
    pub total_size: usize,
    pub current_message: Option<MessageId>,
    pub loop_index: Option<usize>,
}
