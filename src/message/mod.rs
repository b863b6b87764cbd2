// src/message/mod.rs

//! Messages and the collections that hold them.
//!
//! - [`inbox`] holds the per-sheet [`Inbox`] and the per-machine [`Outbox`].
//! - [`iterator`] provides the path-addressed [`MessageIterator`] used by
//!   loop-mode sheets.
//! - [`path`] parses dotted/bracketed paths into message payloads.

pub mod inbox;
pub mod iterator;
pub mod path;

pub use inbox::{DEFAULT_OUTBOX_SIZE, EntryKey, Inbox, InboxEntry, Outbox};
pub use iterator::{LoopElement, MessageIterator};
pub use path::{MessagePath, PathRoot};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Canonical message id type.
pub type MessageId = String;

/// A single message flowing through inboxes and the outbox.
///
/// `data` is the payload; `metadata` is always a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: MessageId,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn generate_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Message {
    /// New message with a generated id and empty metadata.
    pub fn new(data: Value) -> Self {
        Self {
            id: generate_id(),
            data,
            metadata: empty_object(),
        }
    }

    /// New message with an explicit id.
    pub fn with_id(id: impl Into<MessageId>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            metadata: empty_object(),
        }
    }

    /// Set a single metadata field, turning `metadata` into an object if needed.
    pub fn set_meta(&mut self, key: &str, value: Value) {
        if !self.metadata.is_object() {
            self.metadata = empty_object();
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Interpret an arbitrary JSON value as a message.
    ///
    /// Objects carrying at least one of `id`, `data` or `metadata` are read as
    /// full messages; anything else becomes the `data` of a fresh message.
    pub fn from_value(value: Value) -> serde_json::Result<Self> {
        let looks_like_message = value
            .as_object()
            .map(|m| m.contains_key("id") || m.contains_key("data") || m.contains_key("metadata"))
            .unwrap_or(false);

        if looks_like_message {
            let mut msg: Message = serde_json::from_value(value)?;
            if !msg.metadata.is_object() {
                msg.metadata = empty_object();
            }
            Ok(msg)
        } else {
            Ok(Message::new(value))
        }
    }

    /// Parse one JSON text (e.g. a stdin line or a queue payload).
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_value(value)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
