// src/queue/store.rs

//! Credit-limited queue state.
//!
//! A consumer may hold at most [`CREDIT_LIMIT`] delivered but unacknowledged
//! messages. Beyond that, payloads go into a per-queue overflow buffer of at
//! most `max_buffer_size` entries; beyond *that* they are dropped silently.
//! Acknowledging a message either forwards the oldest buffered payload (the
//! credit moves on to it, so `pending` is unchanged) or returns the credit.
//!
//! [`QueueStore`] is plain synchronous state. All mutations are expected to
//! run through the single actor in [`super::actor`], which is what makes each
//! operation atomic with respect to concurrent producers.

use std::collections::{BTreeSet, HashMap, VecDeque};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::QueueKeys;

/// Maximum delivered-but-unacknowledged messages per consumer.
pub const CREDIT_LIMIT: usize = 20;

/// Default bound of the per-queue overflow buffer.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10_000;

/// Result of a single enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Sent straight to the consumer; one credit taken.
    Delivered,
    /// Parked in the overflow buffer, which now holds this many entries.
    Buffered(usize),
    /// Credit and buffer both exhausted; the payload was discarded.
    Dropped,
}

/// Counters of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub buffered: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: usize,
    buffer: VecDeque<String>,
    consumer: Option<mpsc::UnboundedSender<String>>,
}

impl QueueState {
    fn deliver(&mut self, payload: String) -> Result<(), String> {
        let Some(tx) = &self.consumer else {
            return Err(payload);
        };
        if let Err(e) = tx.send(payload) {
            // Receiver is gone: forget it so later puts buffer instead.
            self.consumer = None;
            return Err(e.0);
        }
        Ok(())
    }
}

/// In-process shared store holding every queue of every machine.
#[derive(Debug)]
pub struct QueueStore {
    max_buffer_size: usize,
    queues: HashMap<String, QueueState>,
    /// Consumer membership per source key.
    members: HashMap<String, BTreeSet<String>>,
}

impl Default for QueueStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFER_SIZE)
    }
}

impl QueueStore {
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size: max_buffer_size.max(1),
            queues: HashMap::new(),
            members: HashMap::new(),
        }
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Offer one payload to `queue`.
    pub fn enqueue(&mut self, queue: &str, payload: String) -> EnqueueOutcome {
        let max_buffer = self.max_buffer_size;
        let state = self.queues.entry(queue.to_string()).or_default();

        if state.pending < CREDIT_LIMIT && state.buffer.is_empty() {
            match state.deliver(payload) {
                Ok(()) => {
                    state.pending += 1;
                    trace!(queue, pending = state.pending, "payload delivered");
                    return EnqueueOutcome::Delivered;
                }
                Err(payload) => {
                    // No live consumer: keep it for the next subscriber.
                    return Self::buffer(state, queue, payload, max_buffer);
                }
            }
        }

        Self::buffer(state, queue, payload, max_buffer)
    }

    fn buffer(
        state: &mut QueueState,
        queue: &str,
        payload: String,
        max_buffer: usize,
    ) -> EnqueueOutcome {
        if state.buffer.len() >= max_buffer {
            debug!(queue, max_buffer, "queue saturated; dropping payload");
            return EnqueueOutcome::Dropped;
        }
        state.buffer.push_back(payload);
        trace!(queue, buffered = state.buffer.len(), "payload buffered");
        EnqueueOutcome::Buffered(state.buffer.len())
    }

    /// Consumer finished one message. Returns the remaining buffer length.
    pub fn acknowledge(&mut self, queue: &str) -> usize {
        let Some(state) = self.queues.get_mut(queue) else {
            return 0;
        };

        if let Some(next) = state.buffer.pop_front() {
            if let Err(payload) = state.deliver(next) {
                // Consumer vanished between delivery and ack.
                state.buffer.push_front(payload);
                state.pending = state.pending.saturating_sub(1);
            }
        } else {
            state.pending = state.pending.saturating_sub(1);
        }
        state.buffer.len()
    }

    /// Register the consumer of `keys.queue` and return its delivery stream.
    ///
    /// Resets the credit counter (anything delivered to an earlier consumer
    /// is considered lost), joins the source membership set and hands up to
    /// [`CREDIT_LIMIT`] buffered payloads to the new consumer.
    pub fn subscribe(&mut self, keys: &QueueKeys) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = self.queues.entry(keys.queue.clone()).or_default();
        state.pending = 0;
        state.consumer = Some(tx);

        while state.pending < CREDIT_LIMIT {
            let Some(next) = state.buffer.pop_front() else {
                break;
            };
            if let Err(payload) = state.deliver(next) {
                state.buffer.push_front(payload);
                break;
            }
            state.pending += 1;
        }

        self.members
            .entry(keys.members.clone())
            .or_default()
            .insert(keys.queue.clone());

        debug!(
            queue = %keys.queue,
            source = %keys.source,
            pending = state.pending,
            buffered = state.buffer.len(),
            "consumer subscribed"
        );
        rx
    }

    /// Drop the consumer of `keys.queue` and leave the source membership set.
    pub fn unsubscribe(&mut self, keys: &QueueKeys) {
        if let Some(state) = self.queues.get_mut(&keys.queue) {
            state.consumer = None;
            state.pending = 0;
        }
        if let Some(set) = self.members.get_mut(&keys.members) {
            set.remove(&keys.queue);
            if set.is_empty() {
                self.members.remove(&keys.members);
            }
        }
        debug!(queue = %keys.queue, source = %keys.source, "consumer unsubscribed");
    }

    /// Queue keys subscribed to `source`, in key order.
    pub fn members(&self, source: &str) -> Vec<String> {
        self.members
            .get(&QueueKeys::members_key(source))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        self.queues
            .get(queue)
            .map(|s| QueueStats {
                pending: s.pending,
                buffered: s.buffer.len(),
            })
            .unwrap_or_default()
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.stats(queue).pending
    }

    pub fn buffer_len(&self, queue: &str) -> usize {
        self.stats(queue).buffered
    }
}
