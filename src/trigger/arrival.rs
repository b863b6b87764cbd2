// src/trigger/arrival.rs

use tracing::trace;

use super::{Activation, TriggerConfig, TriggerContext, TriggerPolicy};

/// Fires while the sheet has a pending message.
///
/// Arrival triggers are out-of-cycle: a put into the sheet inbox while the
/// machine runs schedules a drain step instead of waiting for the next
/// cycle. In endless mode the attached message is reused on every firing
/// until the run is stopped.
#[derive(Debug)]
pub struct ArrivalTrigger {
    config: TriggerConfig,
    activation: Activation,
}

impl ArrivalTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            config,
            activation: Activation::default(),
        }
    }
}

impl TriggerPolicy for ArrivalTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, ctx: &TriggerContext) {
        if ctx.has_pending_message {
            trace!("arrival trigger fulfilled by pending message");
            self.activation.fulfil();
        }
    }

    fn is_triggered(&self) -> bool {
        self.activation.triggered(self.is_endless())
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {
        self.activation.settle(self.is_endless());
    }

    fn stop(&mut self) -> bool {
        self.activation.stop()
    }

    fn reuses_message(&self) -> bool {
        self.is_endless() && self.activation.active
    }

    fn is_out_of_cycle(&self) -> bool {
        true
    }
}
