#![allow(dead_code)]

use streamsheets::config::{
    MachineConfig, MachineSection, QueueBindingConfig, QueueSection, RawMachineConfig,
    SheetConfig,
};
use streamsheets::message::{Inbox, MessageIterator, MessagePath};
use streamsheets::sheet::{ProcessorKind, SheetProcessor, SheetUnit};
use streamsheets::trigger::TriggerConfig;

/// Builder for `MachineConfig` to simplify test setup.
pub struct MachineConfigBuilder {
    config: RawMachineConfig,
}

impl MachineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawMachineConfig {
                machine: MachineSection::default(),
                queue: QueueSection::default(),
                sheet: Vec::new(),
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.config.machine.id = id.to_string();
        self
    }

    pub fn cycletime(mut self, ms: u64) -> Self {
        self.config.machine.cycletime = ms;
        self
    }

    pub fn regulated(mut self, val: bool) -> Self {
        self.config.machine.cycle_regulated = val;
        self
    }

    pub fn max_buffer_size(mut self, n: usize) -> Self {
        self.config.queue.max_buffer_size = n;
        self
    }

    pub fn with_sheet(mut self, sheet: SheetConfig) -> Self {
        self.config.sheet.push(sheet);
        self
    }

    pub fn build_raw(self) -> RawMachineConfig {
        self.config
    }

    pub fn build(self) -> MachineConfig {
        MachineConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for MachineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `SheetConfig`.
pub struct SheetConfigBuilder {
    sheet: SheetConfig,
}

impl SheetConfigBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            sheet: SheetConfig {
                id: id.to_string(),
                name: None,
                processor: ProcessorKind::Forward,
                inbox_max_size: None,
                loop_path: None,
                trigger: TriggerConfig::default(),
                queue: None,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.sheet.name = Some(name.to_string());
        self
    }

    pub fn trigger(mut self, trigger: TriggerConfig) -> Self {
        self.sheet.trigger = trigger;
        self
    }

    pub fn loop_path(mut self, path: &str) -> Self {
        self.sheet.loop_path = Some(path.to_string());
        self
    }

    pub fn inbox_max_size(mut self, n: usize) -> Self {
        self.sheet.inbox_max_size = Some(n);
        self
    }

    pub fn processor(mut self, kind: ProcessorKind) -> Self {
        self.sheet.processor = kind;
        self
    }

    pub fn queue_source(mut self, source: &str) -> Self {
        self.sheet.queue = Some(QueueBindingConfig {
            source: source.to_string(),
        });
        self
    }

    pub fn build(self) -> SheetConfig {
        self.sheet
    }
}

/// A sheet with an unbounded inbox and the given processor.
pub fn sheet_unit(
    id: &str,
    trigger: TriggerConfig,
    loop_path: Option<&str>,
    processor: Box<dyn SheetProcessor>,
) -> SheetUnit {
    let path = loop_path.map(|p| MessagePath::parse(p).expect("valid loop path"));
    SheetUnit::new(
        id,
        id,
        &trigger,
        MessageIterator::new(path),
        Inbox::new(None),
        processor,
    )
}
