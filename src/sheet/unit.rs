// src/sheet/unit.rs

//! One reactive computation unit: trigger + iterator + inbox + processor.

use tracing::{debug, info, trace};

use crate::message::{EntryKey, Inbox, InboxEntry, LoopElement, Message, MessageId, MessageIterator, Outbox};
use crate::queue::QueueKeys;
use crate::trigger::{TriggerCommand, TriggerConfig, TriggerContext, TriggerPolicy, build_trigger};

use super::processor::{ProcessContext, ProcessError, ProcessOutcome, SheetProcessor};
use super::{SheetEvent, SheetId, SheetSnapshot, SheetState, SheetStats};

/// Input for a single [`SheetUnit::step`].
#[derive(Debug, Clone, Default)]
pub struct StepRequest {
    pub now_ms: u64,
    /// Manual machine step: time-gated triggers treat their gate as open.
    pub manual: bool,
    pub command: Option<TriggerCommand>,
    /// Message passed explicitly (e.g. with an execute call).
    pub message: Option<Message>,
}

impl StepRequest {
    pub fn cycle(now_ms: u64) -> Self {
        Self {
            now_ms,
            ..Self::default()
        }
    }

    pub fn manual(now_ms: u64) -> Self {
        Self {
            now_ms,
            manual: true,
            ..Self::default()
        }
    }

    pub fn execute(now_ms: u64, message: Option<Message>) -> Self {
        Self {
            now_ms,
            command: Some(TriggerCommand::Execute),
            message,
            ..Self::default()
        }
    }
}

/// A sheet. Owns its trigger, loop iterator, inbox and processor.
///
/// The step sequence is:
/// 1. trigger `pre_process`, eligibility check
/// 2. skip when paused or when an execute would double fire
/// 3. `Resumed` / `Repeat` / `Continue` evaluate in place
/// 4. otherwise attach a message and evaluate
/// 5. advance the loop only when the sheet stayed `Active` and the trigger is
///    not endless (or its loop is exhausted)
/// 6. trigger `post_process`
/// 7. detach and pop a fully processed message unless the trigger reuses it
#[derive(Debug)]
pub struct SheetUnit {
    id: SheetId,
    name: String,
    state: SheetState,
    trigger: Box<dyn TriggerPolicy>,
    iterator: MessageIterator,
    inbox: Inbox,
    processor: Box<dyn SheetProcessor>,
    /// Inbox entry the iterator is attached to.
    current: Option<EntryKey>,
    element: Option<LoopElement>,
    stats: SheetStats,
    queue: Option<QueueKeys>,
    queue_backlog: usize,
}

impl SheetUnit {
    pub fn new(
        id: impl Into<SheetId>,
        name: impl Into<String>,
        trigger: &TriggerConfig,
        iterator: MessageIterator,
        inbox: Inbox,
        processor: Box<dyn SheetProcessor>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: SheetState::Active,
            trigger: build_trigger(trigger),
            iterator,
            inbox,
            processor,
            current: None,
            element: None,
            stats: SheetStats::default(),
            queue: None,
            queue_backlog: 0,
        }
    }

    /// Bind the inbox to a flow-controlled queue.
    pub fn with_queue(mut self, keys: QueueKeys) -> Self {
        self.queue = Some(keys);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SheetState {
        self.state
    }

    pub fn stats(&self) -> SheetStats {
        self.stats
    }

    pub fn trigger(&self) -> &dyn TriggerPolicy {
        self.trigger.as_ref()
    }

    pub fn trigger_mut(&mut self) -> &mut dyn TriggerPolicy {
        self.trigger.as_mut()
    }

    pub fn iterator(&self) -> &MessageIterator {
        &self.iterator
    }

    pub fn iterator_mut(&mut self) -> &mut MessageIterator {
        &mut self.iterator
    }

    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    pub fn queue(&self) -> Option<&QueueKeys> {
        self.queue.as_ref()
    }

    pub fn current_message(&self) -> Option<&Message> {
        self.current
            .and_then(|key| self.inbox.entry(key))
            .map(|e| &e.message)
    }

    fn current_id(&self) -> Option<MessageId> {
        self.current_message().map(|m| m.id.clone())
    }

    pub fn current_element(&self) -> Option<&LoopElement> {
        self.element.as_ref()
    }

    pub fn queue_backlog(&self) -> usize {
        self.queue_backlog
    }

    pub fn set_queue_backlog(&mut self, len: usize) {
        self.queue_backlog = len;
    }

    /// Local inbox size plus messages still buffered in the queue store.
    pub fn total_size(&self) -> usize {
        self.inbox.len() + self.queue_backlog
    }

    /// There is a message that still needs processing: the attached one has
    /// loop elements left, or an unattached one is queued.
    pub fn has_pending_message(&self) -> bool {
        let attached_pending = self.current.is_some() && !self.iterator.is_used();
        attached_pending || self.inbox.count_except(self.current) > 0
    }

    /// Replace the trigger. The old instance is stopped first.
    pub fn set_trigger(&mut self, config: &TriggerConfig) {
        self.trigger.stop();
        debug!(sheet = %self.id, kind = %config.kind, "replacing sheet trigger");
        self.trigger = build_trigger(config);
    }

    /// Local put, subject to the inbox size policy.
    pub fn put(&mut self, message: Message, events: &mut Vec<SheetEvent>) {
        trace!(sheet = %self.id, message = %message.id, "put into inbox");
        if let Some(dropped) = self.inbox.put(message, self.current) {
            events.push(popped(dropped));
        }
    }

    /// Put a message the queue store already sequenced. Bypasses the local
    /// inbox policy; the message owes the store one acknowledgement.
    pub fn deliver(&mut self, message: Message) {
        self.inbox.put_forced(message, true);
    }

    /// Drop every inbox message (attached one included).
    pub fn clear_inbox(&mut self, events: &mut Vec<SheetEvent>) {
        self.detach(events);
        events.extend(self.inbox.clear().into_iter().map(popped));
    }

    /// Pause processing. Idempotent.
    pub fn pause(&mut self) -> bool {
        if self.state == SheetState::Paused {
            return false;
        }
        debug!(sheet = %self.id, from = ?self.state, "sheet paused");
        self.state = SheetState::Paused;
        true
    }

    /// Resume a paused sheet in place. No-op unless paused.
    pub fn resume(&mut self) -> bool {
        if self.state != SheetState::Paused {
            return false;
        }
        debug!(sheet = %self.id, "sheet resumed");
        self.state = SheetState::Resumed;
        true
    }

    /// Stop the trigger's current run. Returns whether it was running.
    pub fn stop_trigger(&mut self) -> bool {
        self.trigger.stop()
    }

    /// Machine stopped: stop the trigger and settle back to `Active`.
    pub fn stop(&mut self) {
        self.trigger.stop();
        self.state = SheetState::Active;
    }

    /// Execute one step. Returns `Ok(true)` if the sheet actually evaluated.
    pub fn step(
        &mut self,
        request: StepRequest,
        outbox: &mut Outbox,
        events: &mut Vec<SheetEvent>,
    ) -> Result<bool, ProcessError> {
        let ctx = TriggerContext {
            now_ms: request.now_ms,
            has_pending_message: self.has_pending_message() || request.message.is_some(),
            command: request.command,
            manual: request.manual,
        };
        self.trigger.pre_process(&ctx);

        if self.state == SheetState::Paused {
            trace!(sheet = %self.id, "sheet paused; skipping step");
            return Ok(false);
        }
        if self.trigger.would_double_fire(&ctx) {
            debug!(sheet = %self.id, "execute already processed in this cycle; skipping");
            return Ok(false);
        }

        let from = self.state;
        let in_transition = matches!(
            from,
            SheetState::Resumed | SheetState::Repeat | SheetState::Continue
        );
        if !in_transition && !self.trigger.is_triggered() {
            return Ok(false);
        }

        self.stats.steps += 1;
        if request.command == Some(TriggerCommand::Execute) {
            self.stats.execute_steps += 1;
        }
        if from == SheetState::Repeat {
            self.stats.repeat_steps += 1;
        }

        if !in_transition {
            self.attach_for_step(request.message, events);
        }

        let outcome = self.evaluate(from, request.now_ms, outbox)?;
        trace!(sheet = %self.id, ?from, ?outcome, "sheet evaluated");

        let returned = outcome == ProcessOutcome::Return;
        self.state = match outcome {
            ProcessOutcome::Done | ProcessOutcome::Return => SheetState::Active,
            ProcessOutcome::Pause => SheetState::Paused,
            ProcessOutcome::Repeat => SheetState::Repeat,
            ProcessOutcome::Continue => SheetState::Continue,
        };

        if returned {
            if self.trigger.stop() {
                info!(sheet = %self.id, "sheet returned; endless run stopped");
            }
            self.iterator.mark_used();
        } else if self.state == SheetState::Active
            && self.current.is_some()
            && (!self.trigger.is_endless() || self.iterator.is_exhausted())
        {
            self.advance();
        }

        self.trigger.post_process(&ctx);

        if self.current.is_some() && self.iterator.is_used() && !self.trigger.reuses_message() {
            self.detach_and_pop(events);
        }

        Ok(true)
    }

    fn attach_for_step(&mut self, explicit: Option<Message>, events: &mut Vec<SheetEvent>) {
        if let Some(message) = explicit {
            if self.current.is_some() {
                if self.iterator.is_used() {
                    self.detach_and_pop(events);
                } else {
                    self.detach(events);
                }
            }
            let key = self.inbox.put_forced(message, false);
            self.attach(key, events);
            return;
        }

        if self.current.is_some() {
            if !self.iterator.is_used() {
                // Loop still has elements: keep going on this message.
                return;
            }
            if self.trigger.reuses_message() {
                self.iterator.rewind();
                self.element = self.iterator.next();
                return;
            }
            self.detach_and_pop(events);
        }

        if let Some(key) = self.inbox.next_after(None).map(|e| e.key) {
            self.attach(key, events);
        }
    }

    fn attach(&mut self, key: EntryKey, events: &mut Vec<SheetEvent>) {
        let Some(message) = self.inbox.entry(key).map(|e| &e.message) else {
            return;
        };
        let id = message.id.clone();
        self.iterator.attach(message);
        self.element = if self.iterator.is_loop() {
            self.iterator.next()
        } else {
            None
        };
        self.stats.messages += 1;
        debug!(
            sheet = %self.id,
            message = %id,
            loop_len = self.iterator.len(),
            "message attached"
        );
        self.current = Some(key);
        events.push(SheetEvent::Attached { message_id: id });
    }

    fn detach(&mut self, events: &mut Vec<SheetEvent>) -> Option<EntryKey> {
        let id = self.current_id();
        let key = self.current.take()?;
        self.iterator.detach();
        self.element = None;
        if let Some(id) = id {
            debug!(sheet = %self.id, message = %id, "message detached");
            events.push(SheetEvent::Detached { message_id: id });
        }
        Some(key)
    }

    fn detach_and_pop(&mut self, events: &mut Vec<SheetEvent>) {
        let Some(key) = self.detach(events) else {
            return;
        };
        if let Some(entry) = self.inbox.remove(key) {
            events.push(popped(entry));
        }
    }

    fn advance(&mut self) {
        if self.iterator.is_loop() && self.iterator.has_next() {
            self.element = self.iterator.next();
        } else {
            self.iterator.mark_used();
        }
    }

    fn evaluate(
        &mut self,
        from: SheetState,
        now_ms: u64,
        outbox: &mut Outbox,
    ) -> Result<ProcessOutcome, ProcessError> {
        let message = self
            .current
            .and_then(|key| self.inbox.entry(key))
            .map(|e| &e.message);
        let mut ctx = ProcessContext {
            sheet_id: &self.id,
            sheet_name: &self.name,
            message,
            element: self.element.as_ref(),
            state: from,
            step: self.stats.steps,
            now_ms,
            outbox,
        };
        self.processor.process(&mut ctx)
    }

    pub fn snapshot(&self) -> SheetSnapshot {
        SheetSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            trigger: self.trigger.kind(),
            repeat: self.trigger.config().repeat,
            trigger_active: self.trigger.is_active(),
            stats: self.stats,
            inbox_size: self.inbox.len(),
            queue_backlog: self.queue_backlog,
            total_size: self.total_size(),
            current_message: self.current_id(),
            loop_index: self.iterator.index(),
        }
    }
}

fn popped(entry: InboxEntry) -> SheetEvent {
    SheetEvent::Popped {
        message_id: entry.message.id,
        acknowledge: entry.acknowledge,
    }
}
