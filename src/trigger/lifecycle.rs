// src/trigger/lifecycle.rs

use tracing::debug;

use super::{Activation, TriggerConfig, TriggerContext, TriggerPolicy, TriggerType};

/// Fires on machine start and/or stop edges.
///
/// A trigger fulfilled by the stop edge holds the machine in `WillStop`
/// until it has run once (non-endless) or until its endless run is stopped.
#[derive(Debug)]
pub struct LifecycleTrigger {
    config: TriggerConfig,
    activation: Activation,
    on_start: bool,
    on_stop: bool,
    stopping: bool,
}

impl LifecycleTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        let (on_start, on_stop) = match config.kind {
            TriggerType::Start => (true, false),
            TriggerType::Stop => (false, true),
            _ => (true, true),
        };
        Self {
            config,
            activation: Activation::default(),
            on_start,
            on_stop,
            stopping: false,
        }
    }
}

impl TriggerPolicy for LifecycleTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, _ctx: &TriggerContext) {
        if self.activation.fulfilled {
            self.activation.active = true;
        }
    }

    fn is_triggered(&self) -> bool {
        self.activation.triggered(self.is_endless())
    }

    fn post_process(&mut self, _ctx: &TriggerContext) {
        self.activation.settle(self.is_endless());
        if !self.activation.active {
            self.stopping = false;
        }
    }

    fn stop(&mut self) -> bool {
        self.stopping = false;
        self.activation.stop()
    }

    fn on_machine_start(&mut self, _now_ms: u64) {
        self.stopping = false;
        self.activation = Activation::default();
        if self.on_start {
            debug!(kind = %self.config.kind, "lifecycle trigger fulfilled by machine start");
            self.activation.fulfilled = true;
        }
    }

    fn on_machine_stop(&mut self) {
        if self.on_stop {
            debug!(kind = %self.config.kind, "lifecycle trigger fulfilled by machine stop");
            self.activation.fulfilled = true;
            self.stopping = true;
        }
    }

    fn prevents_stop(&self) -> bool {
        self.stopping && (self.activation.fulfilled || self.activation.active)
    }
}
