// src/machine/drain.rs

use std::collections::{HashSet, VecDeque};

use crate::sheet::SheetId;

/// FIFO of sheets waiting for an out-of-cycle step.
///
/// Each sheet is queued at most once: scheduling a sheet that is already
/// waiting does nothing.
#[derive(Debug, Default)]
pub struct DrainQueue {
    order: VecDeque<SheetId>,
    queued: HashSet<SheetId>,
}

impl DrainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the sheet was newly queued.
    pub fn schedule(&mut self, sheet: &str) -> bool {
        if !self.queued.insert(sheet.to_string()) {
            return false;
        }
        self.order.push_back(sheet.to_string());
        true
    }

    pub fn pop(&mut self) -> Option<SheetId> {
        let sheet = self.order.pop_front()?;
        self.queued.remove(&sheet);
        Some(sheet)
    }

    pub fn contains(&self, sheet: &str) -> bool {
        self.queued.contains(sheet)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.queued.clear();
    }
}
