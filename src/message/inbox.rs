// src/message/inbox.rs

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::{Message, MessageId};

/// Position-stable handle of one inbox entry.
///
/// Message ids come from producers and may repeat; entries are therefore
/// addressed by a per-inbox sequence number.
pub type EntryKey = u64;

/// One inbox slot.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub key: EntryKey,
    pub message: Message,
    /// Delivered by the queue store; popping it returns one credit.
    pub acknowledge: bool,
}

/// Ordered message collection owned by one sheet.
///
/// Messages are consumed from the front. The optional `max_size` is the
/// inbox's own enqueue policy: when exceeded by [`put`](Self::put), the
/// oldest unattached entry is dropped. [`put_forced`](Self::put_forced)
/// bypasses the policy and is used for messages that were already sequenced
/// by the shared queue store.
#[derive(Debug, Default)]
pub struct Inbox {
    entries: VecDeque<InboxEntry>,
    max_size: Option<usize>,
    next_key: EntryKey,
}

impl Inbox {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size: max_size.map(|n| n.max(1)),
            next_key: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    fn push(&mut self, message: Message, acknowledge: bool) -> EntryKey {
        let key = self.next_key;
        self.next_key += 1;
        self.entries.push_back(InboxEntry {
            key,
            message,
            acknowledge,
        });
        key
    }

    /// Put a message subject to the local size policy.
    ///
    /// Returns the entry that had to be dropped to make room, if any. The
    /// entry `protected` (the attached one) is never dropped.
    pub fn put(&mut self, message: Message, protected: Option<EntryKey>) -> Option<InboxEntry> {
        self.push(message, false);

        let max = self.max_size?;
        if self.entries.len() <= max {
            return None;
        }

        let victim = self
            .entries
            .iter()
            .position(|e| Some(e.key) != protected)?;
        let dropped = self.entries.remove(victim);
        if let Some(e) = &dropped {
            warn!(message = %e.message.id, max_size = max, "inbox full; dropping oldest message");
        }
        dropped
    }

    /// Append a message without applying the local size policy.
    pub fn put_forced(&mut self, message: Message, acknowledge: bool) -> EntryKey {
        debug!(message = %message.id, acknowledge, "forced put into inbox");
        self.push(message, acknowledge)
    }

    pub fn peek(&self) -> Option<&Message> {
        self.entries.front().map(|e| &e.message)
    }

    /// First message with `id`.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| e.message.id == id)
            .map(|e| &e.message)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn entry(&self, key: EntryKey) -> Option<&InboxEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// First entry that is not `exclude` (the attached one).
    pub fn next_after(&self, exclude: Option<EntryKey>) -> Option<&InboxEntry> {
        self.entries.iter().find(|e| Some(e.key) != exclude)
    }

    /// Number of entries other than `exclude`.
    pub fn count_except(&self, exclude: Option<EntryKey>) -> usize {
        self.entries
            .iter()
            .filter(|e| Some(e.key) != exclude)
            .count()
    }

    pub fn pop(&mut self) -> Option<InboxEntry> {
        self.entries.pop_front()
    }

    pub fn remove(&mut self, key: EntryKey) -> Option<InboxEntry> {
        let pos = self.entries.iter().position(|e| e.key == key)?;
        self.entries.remove(pos)
    }

    /// Remove everything, returning the removed entries in order.
    pub fn clear(&mut self) -> Vec<InboxEntry> {
        self.entries.drain(..).collect()
    }

    pub fn ids(&self) -> Vec<MessageId> {
        self.entries.iter().map(|e| e.message.id.clone()).collect()
    }
}

/// Machine-wide collection of produced results.
///
/// Bounded by `max_size`; the oldest results are dropped first. Every put is
/// also recorded as "published" until the machine core collects it with
/// [`take_published`](Self::take_published) to notify subscribers.
#[derive(Debug)]
pub struct Outbox {
    messages: VecDeque<Message>,
    max_size: usize,
    published: Vec<Message>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new(DEFAULT_OUTBOX_SIZE)
    }
}

/// Default retention bound of the outbox.
pub const DEFAULT_OUTBOX_SIZE: usize = 1000;

impl Outbox {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            max_size: max_size.max(1),
            published: Vec::new(),
        }
    }

    pub fn put(&mut self, message: Message) {
        self.published.push(message.clone());
        self.messages.push_back(message);
        while self.messages.len() > self.max_size {
            self.messages.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn peek(&self) -> Option<&Message> {
        self.messages.front()
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop_front()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.messages.len();
        self.messages.clear();
        n
    }

    /// Results put since the last call.
    pub fn take_published(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.published)
    }
}
