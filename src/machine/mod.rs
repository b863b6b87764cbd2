// src/machine/mod.rs

//! The machine: a set of sheets stepped on a fixed, self-regulating cadence.
//!
//! The machine is split the same way as everything else that has to be both
//! testable and async:
//! - [`core`] is the synchronous, deterministic state machine. It owns the
//!   sheets, the outbox and the drain queue, and reports side effects as
//!   [`MachineEffect`]s instead of performing them.
//! - [`runtime`] is the tokio shell: one task that owns the core, the single
//!   cycle deadline, the queue subscriptions and the notification channel.
//! - [`handle`] is the cloneable API other tasks use to talk to a runtime.

pub mod cadence;
pub mod core;
pub mod drain;
pub mod handle;
pub mod runtime;

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub use cadence::{DEFAULT_CYCLETIME, MIN_CYCLETIME, next_cycle_delay};
pub use self::core::MachineCore;
pub use drain::DrainQueue;
pub use handle::MachineHandle;
pub use runtime::MachineRuntime;

use crate::message::{Message, MessageId};
use crate::sheet::{SheetId, SheetSnapshot};

/// Lifecycle of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MachineState {
    #[default]
    Stopped,
    Running,
    Paused,
    /// Stop was requested but a stop-bound trigger still has to run.
    WillStop,
}

impl MachineState {
    /// States in which the cycle deadline is armed.
    pub fn is_cycling(self) -> bool {
        matches!(self, MachineState::Running | MachineState::WillStop)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::Stopped => "stopped",
            MachineState::Running => "running",
            MachineState::Paused => "paused",
            MachineState::WillStop => "willStop",
        };
        f.write_str(s)
    }
}

/// Typed notifications broadcast to machine subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MachineNotification {
    StateChanged {
        from: MachineState,
        to: MachineState,
    },
    #[serde(rename_all = "camelCase")]
    MessageAttached {
        sheet: SheetId,
        message_id: MessageId,
    },
    #[serde(rename_all = "camelCase")]
    MessageDetached {
        sheet: SheetId,
        message_id: MessageId,
    },
    OutboxPut {
        message: Message,
    },
    Error {
        sheet: Option<SheetId>,
        message: String,
    },
}

/// Side effects requested by [`MachineCore`]; performed by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEffect {
    /// (Re)arm the single cycle deadline.
    ScheduleCycle { delay: Duration },
    /// Disarm the cycle deadline.
    CancelCycle,
    /// Return one credit of a sheet's queue.
    Acknowledge { sheet: SheetId, queue: String },
    /// Route a put through a sheet's queue instead of its inbox.
    Enqueue {
        sheet: SheetId,
        queue: String,
        message: Message,
    },
    Notify(MachineNotification),
}

/// Serializable machine view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    pub id: String,
    pub name: String,
    pub state: MachineState,
    pub cycletime: u64,
    pub cycle_regulated: bool,
    pub cycles: u64,
    pub outbox_size: usize,
    pub sheets: Vec<SheetSnapshot>,
}

/// Wall clock in unix milliseconds, as seen by triggers.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
