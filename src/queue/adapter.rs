// src/queue/adapter.rs

//! Producer side of the queue and the key scheme shared with consumers.

use std::fmt;

use tracing::{debug, trace};

use crate::errors::Result;
use crate::message::Message;

use super::actor::StoreHandle;
use super::store::EnqueueOutcome;

/// Store keys of one sheet inbox queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueKeys {
    /// Producer name this queue consumes from.
    pub source: String,
    /// `streamsheets:inbox:<machine>:<sheet>`
    pub queue: String,
    /// `<queue>.pending`
    pub pending: String,
    /// `streamsheets:consumers:<source>`
    pub members: String,
}

impl QueueKeys {
    pub fn for_sheet(machine_id: &str, sheet_id: &str, source: &str) -> Self {
        let queue = format!("streamsheets:inbox:{machine_id}:{sheet_id}");
        Self {
            source: source.to_string(),
            pending: format!("{queue}.pending"),
            members: Self::members_key(source),
            queue,
        }
    }

    pub fn members_key(source: &str) -> String {
        format!("streamsheets:consumers:{source}")
    }
}

impl fmt::Display for QueueKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.queue)
    }
}

/// Publishes messages into every consumer queue of a source.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    store: StoreHandle,
}

impl QueueProducer {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Fan `message` out to all current members of `source`.
    ///
    /// Returns one outcome per member queue; an empty list means nobody is
    /// subscribed.
    pub async fn publish(
        &self,
        source: &str,
        message: &Message,
    ) -> Result<Vec<(String, EnqueueOutcome)>> {
        let payload = message.to_json_string()?;
        let members = self.store.members(source).await?;
        if members.is_empty() {
            debug!(source, message = %message.id, "no consumers for source; message discarded");
        }

        let mut outcomes = Vec::with_capacity(members.len());
        for queue in members {
            let outcome = self.store.enqueue(&queue, payload.clone()).await?;
            trace!(source, queue = %queue, ?outcome, "published");
            outcomes.push((queue, outcome));
        }
        Ok(outcomes)
    }

    /// Enqueue directly into a single queue.
    pub async fn publish_to(&self, keys: &QueueKeys, message: &Message) -> Result<EnqueueOutcome> {
        let payload = message.to_json_string()?;
        self.store.enqueue(&keys.queue, payload).await
    }
}
