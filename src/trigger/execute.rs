// src/trigger/execute.rs

use super::{Activation, TriggerCommand, TriggerConfig, TriggerContext, TriggerPolicy};

/// Fires only on an explicit execute command.
///
/// `is_processed` blocks a second execute within the same cycle. It is
/// cleared at the next cycle boundary and whenever the machine starts or stops.
#[derive(Debug)]
pub struct ExecuteTrigger {
    config: TriggerConfig,
    activation: Activation,
    is_processed: bool,
}

impl ExecuteTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            activation: Activation::default(),
            is_processed: false,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.is_processed
    }
}

impl TriggerPolicy for ExecuteTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, ctx: &TriggerContext) {
        if ctx.command == Some(TriggerCommand::Execute) && !self.is_processed {
            self.activation.fulfil();
        }
    }

    fn is_triggered(&self) -> bool {
        self.activation.triggered(self.is_endless())
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {
        if self.activation.fulfilled {
            self.is_processed = true;
        }
        self.activation.settle(self.is_endless());
    }

    fn stop(&mut self) -> bool {
        self.activation.stop()
    }

    fn on_machine_start(&mut self, _now_ms: u64) {
        self.is_processed = false;
    }

    fn on_machine_stop(&mut self) {
        self.is_processed = false;
    }

    fn on_cycle_start(&mut self) {
        self.is_processed = false;
    }

    fn would_double_fire(&self, ctx: &TriggerContext) -> bool {
        ctx.command == Some(TriggerCommand::Execute) && self.is_processed
    }
}
