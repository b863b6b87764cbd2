// src/machine/core.rs

//! Pure machine state machine.
//!
//! [`MachineCore`] owns the sheets, the shared outbox and the drain queue.
//! Every operation updates state synchronously and records the side effects
//! the async shell has to perform (timers, queue acknowledgements,
//! notifications) as [`MachineEffect`]s, collected with
//! [`take_effects`](MachineCore::take_effects).
//!
//! There are no channels, tasks or clocks in here; the caller passes the
//! current time in. This keeps the whole scheduling semantics testable
//! without Tokio.

use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::errors::{Result, StreamsheetError};
use crate::message::{Message, Outbox};
use crate::queue::QueueKeys;
use crate::sheet::{ProcessError, SheetEvent, SheetId, SheetUnit, StepRequest};

use super::cadence::MIN_CYCLETIME;
use super::drain::DrainQueue;
use super::{MachineEffect, MachineNotification, MachineSnapshot, MachineState};

#[derive(Debug)]
pub struct MachineCore {
    id: String,
    name: String,
    state: MachineState,
    cycletime: Duration,
    cycle_regulated: bool,
    sheets: Vec<SheetUnit>,
    outbox: Outbox,
    drains: DrainQueue,
    in_cycle: bool,
    cycles: u64,
    effects: Vec<MachineEffect>,
}

impl MachineCore {
    pub fn new(id: impl Into<String>, name: impl Into<String>, cycletime: Duration) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: MachineState::Stopped,
            cycletime: cycletime.max(MIN_CYCLETIME),
            cycle_regulated: true,
            sheets: Vec::new(),
            outbox: Outbox::default(),
            drains: DrainQueue::new(),
            in_cycle: false,
            cycles: 0,
            effects: Vec::new(),
        }
    }

    pub fn with_regulation(mut self, regulated: bool) -> Self {
        self.cycle_regulated = regulated;
        self
    }

    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = outbox;
        self
    }

    /// Append a sheet. Sheets step in insertion order.
    pub fn add_sheet(&mut self, sheet: SheetUnit) -> Result<()> {
        if self.sheet(sheet.id()).is_some() {
            return Err(StreamsheetError::ConfigError(format!(
                "duplicate sheet id '{}'",
                sheet.id()
            )));
        }
        self.sheets.push(sheet);
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn cycletime(&self) -> Duration {
        self.cycletime
    }

    pub fn is_regulated(&self) -> bool {
        self.cycle_regulated
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn is_in_cycle(&self) -> bool {
        self.in_cycle
    }

    pub fn sheets(&self) -> &[SheetUnit] {
        &self.sheets
    }

    pub fn sheet(&self, id: &str) -> Option<&SheetUnit> {
        self.sheets.iter().find(|s| s.id() == id)
    }

    pub fn sheet_mut(&mut self, id: &str) -> Option<&mut SheetUnit> {
        self.sheets.iter_mut().find(|s| s.id() == id)
    }

    fn sheet_index(&self, id: &str) -> Result<usize> {
        self.sheets
            .iter()
            .position(|s| s.id() == id)
            .ok_or_else(|| StreamsheetError::UnknownSheet(id.to_string()))
    }

    /// Sheets whose inbox is bound to a queue.
    pub fn queue_bindings(&self) -> Vec<(SheetId, QueueKeys)> {
        self.sheets
            .iter()
            .filter_map(|s| s.queue().map(|k| (s.id().to_string(), k.clone())))
            .collect()
    }

    pub fn has_pending_drains(&self) -> bool {
        !self.drains.is_empty()
    }

    pub fn pending_drains(&self) -> usize {
        self.drains.len()
    }

    /// Effects recorded since the last call.
    pub fn take_effects(&mut self) -> Vec<MachineEffect> {
        std::mem::take(&mut self.effects)
    }

    fn notify(&mut self, notification: MachineNotification) {
        self.effects.push(MachineEffect::Notify(notification));
    }

    fn set_state(&mut self, to: MachineState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(machine = %self.id, %from, %to, "machine state changed");
        self.notify(MachineNotification::StateChanged { from, to });
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start (or resume) the machine. No-op while running.
    pub fn start(&mut self, now_ms: u64) -> MachineState {
        match self.state {
            MachineState::Running => return self.state,
            MachineState::Stopped => {
                for sheet in &mut self.sheets {
                    sheet.trigger_mut().on_machine_start(now_ms);
                }
                self.cycles = 0;
            }
            MachineState::Paused | MachineState::WillStop => {}
        }
        self.set_state(MachineState::Running);
        self.effects.push(MachineEffect::ScheduleCycle {
            delay: Duration::ZERO,
        });
        self.state
    }

    /// Pause the cycle loop. No-op unless running.
    pub fn pause(&mut self) -> MachineState {
        if self.state != MachineState::Running {
            return self.state;
        }
        self.set_state(MachineState::Paused);
        self.effects.push(MachineEffect::CancelCycle);
        self.state
    }

    /// Request a stop.
    ///
    /// If any stop-bound trigger has to run first, the machine enters
    /// `WillStop` and keeps cycling those sheets. A second stop while in
    /// `WillStop` forces the stop.
    pub fn stop(&mut self) -> MachineState {
        match self.state {
            MachineState::Stopped => return self.state,
            MachineState::WillStop => {
                debug!(machine = %self.id, "stop requested while stopping; forcing");
                self.finish_stop();
                return self.state;
            }
            MachineState::Running | MachineState::Paused => {}
        }

        for sheet in &mut self.sheets {
            sheet.trigger_mut().on_machine_stop();
        }

        if self.prevents_stop() {
            self.set_state(MachineState::WillStop);
            self.effects.push(MachineEffect::ScheduleCycle {
                delay: Duration::ZERO,
            });
        } else {
            self.finish_stop();
        }
        self.state
    }

    fn prevents_stop(&self) -> bool {
        self.sheets.iter().any(|s| s.trigger().prevents_stop())
    }

    fn finish_stop(&mut self) {
        for sheet in &mut self.sheets {
            sheet.stop();
        }
        self.drains.clear();
        self.in_cycle = false;
        self.effects.push(MachineEffect::CancelCycle);
        self.set_state(MachineState::Stopped);
    }

    /// Processor failure: force the machine down and report it.
    fn fail(&mut self, sheet: &str, err: ProcessError) {
        error!(machine = %self.id, sheet, error = %err, "sheet processing failed; stopping machine");
        self.notify(MachineNotification::Error {
            sheet: Some(sheet.to_string()),
            message: err.to_string(),
        });
        self.finish_stop();
    }

    // ---------------------------------------------------------------------
    // Cycles
    // ---------------------------------------------------------------------

    /// Run one scheduled cycle. Ignored unless the machine is cycling.
    pub fn cycle(&mut self, now_ms: u64) {
        if !self.state.is_cycling() {
            trace!(machine = %self.id, state = %self.state, "stale cycle; ignoring");
            return;
        }
        self.run_cycle(now_ms, false);
    }

    /// Manual single step. Only allowed while stopped or paused.
    pub fn manual_step(&mut self, now_ms: u64) -> bool {
        if !matches!(self.state, MachineState::Stopped | MachineState::Paused) {
            debug!(machine = %self.id, state = %self.state, "manual step ignored");
            return false;
        }
        self.run_cycle(now_ms, true);
        true
    }

    fn run_cycle(&mut self, now_ms: u64, manual: bool) {
        self.in_cycle = true;
        self.cycles += 1;
        let stopping = self.state == MachineState::WillStop;
        trace!(machine = %self.id, cycle = self.cycles, manual, stopping, "cycle start");

        for sheet in &mut self.sheets {
            sheet.trigger_mut().on_cycle_start();
        }

        for idx in 0..self.sheets.len() {
            if stopping && !self.sheets[idx].trigger().prevents_stop() {
                continue;
            }
            let request = if manual {
                StepRequest::manual(now_ms)
            } else {
                StepRequest::cycle(now_ms)
            };
            if let Err(err) = self.step_sheet(idx, request) {
                let sheet = self.sheets[idx].id().to_string();
                self.fail(&sheet, err);
                return;
            }
        }

        self.in_cycle = false;

        if stopping && !self.prevents_stop() {
            debug!(machine = %self.id, "stop-bound sheets finished");
            self.finish_stop();
        }
    }

    /// Step one sheet and translate what happened into effects.
    fn step_sheet(&mut self, idx: usize, request: StepRequest) -> std::result::Result<bool, ProcessError> {
        let mut events = Vec::new();
        let sheet = &mut self.sheets[idx];
        let stepped = sheet.step(request, &mut self.outbox, &mut events);
        let sheet_id = sheet.id().to_string();
        let queue = sheet.queue().map(|k| k.queue.clone());

        self.apply_sheet_events(&sheet_id, queue.as_deref(), events);
        for message in self.outbox.take_published() {
            self.notify(MachineNotification::OutboxPut { message });
        }
        stepped
    }

    fn apply_sheet_events(&mut self, sheet: &str, queue: Option<&str>, events: Vec<SheetEvent>) {
        for event in events {
            match event {
                SheetEvent::Attached { message_id } => {
                    self.notify(MachineNotification::MessageAttached {
                        sheet: sheet.to_string(),
                        message_id,
                    });
                }
                SheetEvent::Detached { message_id } => {
                    self.notify(MachineNotification::MessageDetached {
                        sheet: sheet.to_string(),
                        message_id,
                    });
                }
                SheetEvent::Popped {
                    message_id,
                    acknowledge,
                } => {
                    trace!(sheet, message = %message_id, acknowledge, "message popped");
                    if let (true, Some(queue)) = (acknowledge, queue) {
                        self.effects.push(MachineEffect::Acknowledge {
                            sheet: sheet.to_string(),
                            queue: queue.to_string(),
                        });
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------------

    /// Put a message for `sheet`. Queue-bound sheets receive it through
    /// their queue; all others directly into the inbox.
    pub fn put_message(&mut self, sheet: &str, message: Message) -> Result<()> {
        let idx = self.sheet_index(sheet)?;

        if let Some(keys) = self.sheets[idx].queue() {
            let queue = keys.queue.clone();
            self.effects.push(MachineEffect::Enqueue {
                sheet: sheet.to_string(),
                queue,
                message,
            });
            return Ok(());
        }

        let mut events = Vec::new();
        self.sheets[idx].put(message, &mut events);
        self.apply_sheet_events(sheet, None, events);
        self.schedule_drain(idx);
        Ok(())
    }

    /// A payload delivered by the queue store for `sheet`.
    ///
    /// Malformed payloads are acknowledged (their credit returned) and
    /// discarded.
    pub fn deliver(&mut self, sheet: &str, payload: &str) -> Result<()> {
        let idx = self.sheet_index(sheet)?;
        let queue = self.sheets[idx].queue().map(|k| k.queue.clone());

        match Message::from_json_str(payload) {
            Ok(message) => {
                trace!(sheet, message = %message.id, "queue delivered message");
                self.sheets[idx].deliver(message);
                self.schedule_drain(idx);
            }
            Err(e) => {
                warn!(sheet, error = %e, "malformed queue payload; discarding");
                if let Some(queue) = queue {
                    self.effects.push(MachineEffect::Acknowledge {
                        sheet: sheet.to_string(),
                        queue,
                    });
                }
            }
        }
        Ok(())
    }

    /// Queue an out-of-cycle step for arrival-driven sheets.
    fn schedule_drain(&mut self, idx: usize) {
        let sheet = &self.sheets[idx];
        if !sheet.trigger().is_out_of_cycle()
            || self.state != MachineState::Running
            || self.in_cycle
        {
            return;
        }
        if self.drains.schedule(sheet.id()) {
            trace!(sheet = %sheet.id(), "drain scheduled");
        }
    }

    /// Step the next sheet waiting in the drain queue. Re-arms the sheet while
    /// it still has pending messages. Returns whether a sheet was stepped.
    pub fn run_drain(&mut self, now_ms: u64) -> bool {
        if self.state != MachineState::Running {
            self.drains.clear();
            return false;
        }
        let Some(sheet) = self.drains.pop() else {
            return false;
        };
        let Ok(idx) = self.sheet_index(&sheet) else {
            return false;
        };

        match self.step_sheet(idx, StepRequest::cycle(now_ms)) {
            Ok(stepped) => {
                if self.state == MachineState::Running
                    && self.sheets[idx].has_pending_message()
                {
                    self.drains.schedule(&sheet);
                }
                stepped
            }
            Err(err) => {
                self.fail(&sheet, err);
                false
            }
        }
    }

    /// Explicitly execute `sheet`, optionally with a message.
    ///
    /// While the machine is cycling an execute trigger fires at most once per
    /// cycle. Outside the cycle loop every execute opens its own cycle.
    pub fn execute(&mut self, sheet: &str, message: Option<Message>, now_ms: u64) -> Result<bool> {
        let idx = self.sheet_index(sheet)?;
        if !self.state.is_cycling() {
            self.sheets[idx].trigger_mut().on_cycle_start();
        }
        self.step_sheet(idx, StepRequest::execute(now_ms, message))
            .map_err(|e| StreamsheetError::Processing {
                sheet: sheet.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn pause_sheet(&mut self, sheet: &str) -> Result<bool> {
        let idx = self.sheet_index(sheet)?;
        Ok(self.sheets[idx].pause())
    }

    pub fn resume_sheet(&mut self, sheet: &str) -> Result<bool> {
        let idx = self.sheet_index(sheet)?;
        Ok(self.sheets[idx].resume())
    }

    pub fn stop_sheet(&mut self, sheet: &str) -> Result<bool> {
        let idx = self.sheet_index(sheet)?;
        let stopped = self.sheets[idx].stop_trigger();
        debug!(machine = %self.id, sheet, stopped, "sheet trigger stopped");
        Ok(stopped)
    }

    /// Drop every inbox message of `sheet`.
    pub fn clear_inbox(&mut self, sheet: &str) -> Result<()> {
        let idx = self.sheet_index(sheet)?;
        let mut events = Vec::new();
        self.sheets[idx].clear_inbox(&mut events);
        let queue = self.sheets[idx].queue().map(|k| k.queue.clone());
        self.apply_sheet_events(sheet, queue.as_deref(), events);
        Ok(())
    }

    /// Change the cycle time. Re-arms the deadline while cycling.
    pub fn set_cycletime(&mut self, cycletime_ms: u64) -> Result<()> {
        if cycletime_ms == 0 {
            return Err(StreamsheetError::InvalidRequest {
                request: "setCycleTime".to_string(),
                reason: "cycletime must be at least 1 ms".to_string(),
            });
        }
        self.cycletime = Duration::from_millis(cycletime_ms);
        debug!(machine = %self.id, cycletime_ms, "cycletime changed");
        if self.state.is_cycling() && !self.in_cycle {
            self.effects.push(MachineEffect::ScheduleCycle {
                delay: self.cycletime,
            });
        }
        Ok(())
    }

    /// Mirror the store's buffer length for `sheet`.
    pub fn set_queue_backlog(&mut self, sheet: &str, len: usize) {
        if let Some(s) = self.sheet_mut(sheet) {
            s.set_queue_backlog(len);
        }
    }

    // ---------------------------------------------------------------------
    // Views
    // ---------------------------------------------------------------------

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn clear_outbox(&mut self) -> usize {
        self.outbox.clear()
    }

    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            cycletime: self.cycletime.as_millis() as u64,
            cycle_regulated: self.cycle_regulated,
            cycles: self.cycles,
            outbox_size: self.outbox.len(),
            sheets: self.sheets.iter().map(SheetUnit::snapshot).collect(),
        }
    }
}
