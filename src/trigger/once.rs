// src/trigger/once.rs

use super::{Activation, TriggerConfig, TriggerContext, TriggerPolicy};

/// Fires once per machine run (every step after that when endless).
#[derive(Debug)]
pub struct OnceTrigger {
    config: TriggerConfig,
    activation: Activation,
    done: bool,
}

impl OnceTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            activation: Activation::default(),
            done: false,
        }
    }
}

impl TriggerPolicy for OnceTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, _ctx: &TriggerContext) {
        if !self.done {
            self.activation.fulfil();
        }
    }

    fn is_triggered(&self) -> bool {
        self.activation.triggered(self.is_endless())
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {
        if self.activation.fulfilled {
            self.done = true;
        }
        self.activation.settle(self.is_endless());
    }

    fn stop(&mut self) -> bool {
        self.activation.stop()
    }

    fn on_machine_start(&mut self, _now_ms: u64) {
        self.done = false;
        self.activation = Activation::default();
    }
}
