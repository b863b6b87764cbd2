// src/config/model.rs

use serde::Deserialize;

use crate::message::DEFAULT_OUTBOX_SIZE;
use crate::queue::DEFAULT_MAX_BUFFER_SIZE;
use crate::sheet::ProcessorKind;
use crate::trigger::TriggerConfig;

/// Launch configuration of one machine, as read from TOML.
///
/// ```toml
/// [machine]
/// id = "m1"
/// name = "demo"
/// cycletime = 100
///
/// [queue]
/// max_buffer_size = 10000
///
/// [[sheet]]
/// id = "s1"
/// trigger = { type = "arrival", repeat = "once" }
/// queue = { source = "stdin" }
/// ```
///
/// Deserialized without semantic checks; use
/// `MachineConfig::try_from(raw)` (see `validate.rs`) to get a validated
/// [`MachineConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawMachineConfig {
    #[serde(default)]
    pub machine: MachineSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub sheet: Vec<SheetConfig>,
}

/// Validated machine configuration.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub machine: MachineSection,
    pub queue: QueueSection,
    pub sheet: Vec<SheetConfig>,
}

impl MachineConfig {
    /// Construct without validation. Callers must have validated already.
    pub(crate) fn new_unchecked(
        machine: MachineSection,
        queue: QueueSection,
        sheet: Vec<SheetConfig>,
    ) -> Self {
        Self {
            machine,
            queue,
            sheet,
        }
    }

    pub fn display_name(&self) -> &str {
        self.machine.name.as_deref().unwrap_or(&self.machine.id)
    }
}

/// `[machine]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineSection {
    #[serde(default = "default_machine_id")]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Target cycle length in milliseconds.
    #[serde(default = "default_cycletime")]
    pub cycletime: u64,

    /// Realign overrunning cycles onto a 10/100 ms grid.
    #[serde(default = "default_true")]
    pub cycle_regulated: bool,

    /// Retention bound of the machine outbox.
    #[serde(default = "default_outbox_size")]
    pub outbox_max_size: usize,
}

fn default_machine_id() -> String {
    "machine".to_string()
}

fn default_cycletime() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_outbox_size() -> usize {
    DEFAULT_OUTBOX_SIZE
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            id: default_machine_id(),
            name: None,
            cycletime: default_cycletime(),
            cycle_regulated: true,
            outbox_max_size: default_outbox_size(),
        }
    }
}

/// `[queue]` section: flow control and request tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_request_timeout_ms() -> u64 {
    20_000
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// One `[[sheet]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub processor: ProcessorKind,

    /// Local inbox bound; the oldest unattached message is dropped beyond it.
    #[serde(default)]
    pub inbox_max_size: Option<usize>,

    /// Loop over the collection at this message path, one element per step.
    #[serde(default)]
    pub loop_path: Option<String>,

    #[serde(default)]
    pub trigger: TriggerConfig,

    /// Bind the inbox to the flow-controlled queue of a source.
    #[serde(default)]
    pub queue: Option<QueueBindingConfig>,
}

impl SheetConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueBindingConfig {
    pub source: String,
}
