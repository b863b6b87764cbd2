// src/message/iterator.rs

//! Path-addressed cursor over the collection inside a message.

use serde_json::Value;

use super::{Message, MessagePath};

/// One element of the looped collection, as seen by a processor.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopElement {
    pub index: usize,
    /// Array index rendered as a string, or the object key.
    pub key: String,
    pub value: Value,
}

/// Cursor over the sub-structure of a message addressed by a [`MessagePath`].
///
/// The collection is resolved once per [`attach`](Self::attach) and its
/// enumeration order is captured in `keys`. The cursor starts *before* the
/// first element; `next()` parks one past the last element and never
/// overruns; `previous()` never moves below the first element.
///
/// A disabled iterator returns `None` from `next`/`previous` and keeps its
/// position, so re-enabling resumes where it left off.
#[derive(Debug, Clone, Default)]
pub struct MessageIterator {
    path: Option<MessagePath>,
    enabled: bool,
    keys: Vec<String>,
    values: Vec<Value>,
    /// -1 = before start, `len` = past end.
    cursor: isize,
    used: bool,
}

impl MessageIterator {
    pub fn new(path: Option<MessagePath>) -> Self {
        Self {
            path,
            enabled: true,
            keys: Vec::new(),
            values: Vec::new(),
            cursor: -1,
            used: false,
        }
    }

    pub fn path(&self) -> Option<&MessagePath> {
        self.path.as_ref()
    }

    /// Replace the loop path. Takes effect on the next attach.
    pub fn set_path(&mut self, path: Option<MessagePath>) {
        self.path = path;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// True if a path is configured and the iterator is enabled.
    pub fn is_loop(&self) -> bool {
        self.enabled && self.path.is_some()
    }

    /// Resolve the addressed collection of `message` and rewind the cursor.
    ///
    /// Arrays enumerate by index, objects by key (insertion order). Scalars or
    /// missing paths yield an empty collection.
    pub fn attach(&mut self, message: &Message) {
        self.keys.clear();
        self.values.clear();
        self.cursor = -1;
        self.used = false;

        let Some(path) = &self.path else {
            return;
        };

        match path.resolve(message) {
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.keys.push(i.to_string());
                    self.values.push(item.clone());
                }
            }
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    self.keys.push(key.clone());
                    self.values.push(value.clone());
                }
            }
            _ => {}
        }
    }

    /// Forget the attached collection.
    pub fn detach(&mut self) {
        self.keys.clear();
        self.values.clear();
        self.cursor = -1;
        self.used = false;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn next(&mut self) -> Option<LoopElement> {
        if !self.enabled {
            return None;
        }
        if self.cursor < self.len() as isize {
            self.cursor += 1;
        }
        self.current()
    }

    pub fn previous(&mut self) -> Option<LoopElement> {
        if !self.enabled || self.cursor <= 0 {
            return None;
        }
        self.cursor -= 1;
        self.current()
    }

    pub fn has_next(&self) -> bool {
        self.enabled && self.cursor + 1 < self.len() as isize
    }

    pub fn has_previous(&self) -> bool {
        self.enabled && self.cursor > 0 && !self.is_empty()
    }

    /// Index of the element under the cursor, if any.
    pub fn index(&self) -> Option<usize> {
        if self.cursor >= 0 && (self.cursor as usize) < self.len() {
            Some(self.cursor as usize)
        } else {
            None
        }
    }

    pub fn index_key(&self) -> Option<&str> {
        self.index().map(|i| self.keys[i].as_str())
    }

    /// Element under the cursor.
    pub fn current(&self) -> Option<LoopElement> {
        let i = self.index()?;
        Some(LoopElement {
            index: i,
            key: self.keys[i].clone(),
            value: self.values[i].clone(),
        })
    }

    /// No further element can be reached with `next()`.
    pub fn is_exhausted(&self) -> bool {
        !self.is_loop() || !self.has_next()
    }

    pub fn is_used(&self) -> bool {
        self.used
    }

    pub fn mark_used(&mut self) {
        self.used = true;
    }

    /// Rewind to before the first element, keeping the captured collection.
    pub fn rewind(&mut self) {
        self.cursor = -1;
        self.used = false;
    }
}
