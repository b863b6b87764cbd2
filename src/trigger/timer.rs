// src/trigger/timer.rs

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{Activation, TriggerConfig, TriggerContext, TriggerPolicy};

/// Fires once `now - last >= next_interval`.
///
/// The random variant redraws `next_interval` uniformly in
/// `[0, 2 * interval)` after every firing. A configured `start` gates the
/// first firing; without it the first firing happens one interval after the
/// machine started.
#[derive(Debug)]
pub struct TimerTrigger {
    config: TriggerConfig,
    activation: Activation,
    interval_ms: u64,
    next_interval_ms: u64,
    last_ms: Option<u64>,
    rng: Option<StdRng>,
}

impl TimerTrigger {
    /// Fixed-interval timer.
    pub fn new(config: TriggerConfig) -> Self {
        let interval_ms = config.interval_ms();
        Self {
            config,
            activation: Activation::default(),
            interval_ms,
            next_interval_ms: interval_ms,
            last_ms: None,
            rng: None,
        }
    }

    /// Random-interval timer seeded from the OS.
    pub fn random(config: TriggerConfig) -> Self {
        Self::random_with_rng(config, StdRng::from_os_rng())
    }

    /// Random-interval timer with a fixed seed (reproducible draws).
    pub fn random_with_seed(config: TriggerConfig, seed: u64) -> Self {
        Self::random_with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn random_with_rng(config: TriggerConfig, rng: StdRng) -> Self {
        let mut trigger = Self::new(config);
        trigger.rng = Some(rng);
        trigger.redraw();
        trigger
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn next_interval_ms(&self) -> u64 {
        self.next_interval_ms
    }

    pub fn last_trigger_ms(&self) -> Option<u64> {
        self.last_ms
    }

    fn redraw(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            let upper = self.interval_ms.saturating_mul(2).max(1);
            self.next_interval_ms = rng.random_range(0..upper);
        }
    }

    fn start_gate_open(&self, now_ms: u64) -> bool {
        self.config.start.is_none_or(|start| now_ms >= start)
    }
}

impl TriggerPolicy for TimerTrigger {
    fn config(&self) -> &TriggerConfig {
        &self.config
    }

    fn is_active(&self) -> bool {
        self.activation.active
    }

    fn pre_process(&mut self, ctx: &TriggerContext) {
        let now = ctx.now_ms;
        if !self.start_gate_open(now) {
            return;
        }

        let due = match (self.last_ms, self.config.start) {
            (Some(last), _) => now.saturating_sub(last) >= self.next_interval_ms,
            (None, Some(_)) => true,
            (None, None) => {
                // Not started through the machine yet: begin counting now.
                self.last_ms = Some(now);
                false
            }
        };

        if due || ctx.manual {
            debug!(
                now_ms = now,
                last_ms = ?self.last_ms,
                next_interval_ms = self.next_interval_ms,
                manual = ctx.manual,
                "timer trigger fulfilled"
            );
            self.activation.fulfil();
            self.last_ms = Some(now);
            self.redraw();
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

    fn on_machine_start(&mut self, now_ms: u64) {
        self.activation = Activation::default();
        self.last_ms = if self.config.start.is_some() {
            None
        } else {
            Some(now_ms)
        };
        self.redraw();
    }
}
