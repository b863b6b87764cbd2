// src/trigger/continuous.rs

use super::{Activation, TriggerConfig, TriggerContext, TriggerPolicy};

/// Fires on every step once activated by the first `pre_process`.
#[derive(Debug)]
pub struct ContinuousTrigger {
    config: TriggerConfig,
    activation: Activation,
}

impl ContinuousTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            activation: Activation::default(),
        }
    }
}

impl TriggerPolicy for ContinuousTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, _ctx: &TriggerContext) {
        self.activation.fulfil();
    }

    fn is_triggered(&self) -> bool {
        self.activation.active
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {
        // Always eligible; only the per-cycle flag is cleared.
        self.activation.settle(true);
    }

    fn stop(&mut self) -> bool {
        self.activation.stop()
    }
}

/// Never fires. Sheets with this trigger only run through explicit calls.
#[derive(Debug)]
pub struct NeverTrigger {
    config: TriggerConfig,
}

impl NeverTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self { config }
    }
}

impl TriggerPolicy for NeverTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        false
    }

    fn pre_process(&mut self, _ctx: &TriggerContext) {}

    fn is_triggered(&self) -> bool {
        false
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {}

    fn stop(&mut self) -> bool {
        false
    }
}
