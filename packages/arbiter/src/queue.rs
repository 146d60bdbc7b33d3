//! Demands waiting for capacity.
//!
//! Held in priority order (highest first), ties in submission order.

use crate::capability::ChannelSet;
use crate::demand::{Demand, DemandHandle};
use crate::resolver::QueueReason;

#[derive(Debug, Clone)]
pub struct QueuedEntry {
    pub handle: DemandHandle,
    pub demand: Demand,
    pub seq: u64,
    pub channels: ChannelSet,
    pub reason: QueueReason,
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: Vec<QueuedEntry>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedEntry> {
        self.entries.iter()
    }

    pub fn contains(&self, handle: &DemandHandle) -> bool {
        self.entries.iter().any(|e| e.handle == *handle)
    }

    pub fn get(&self, handle: &DemandHandle) -> Option<&QueuedEntry> {
        self.entries.iter().find(|e| e.handle == *handle)
    }

    /// Insert keeping (priority desc, seq asc) order.
    pub(crate) fn push(&mut self, entry: QueuedEntry) {
        let idx = self
            .entries
            .iter()
            .position(|e| {
                entry.demand.priority > e.demand.priority
                    || (entry.demand.priority == e.demand.priority && entry.seq < e.seq)
            })
            .unwrap_or(self.entries.len());
        self.entries.insert(idx, entry);
    }

    pub(crate) fn remove(&mut self, handle: &DemandHandle) -> Option<QueuedEntry> {
        let idx = self.entries.iter().position(|e| e.handle == *handle)?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn set_reason(&mut self, handle: &DemandHandle, reason: QueueReason) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == *handle) {
            entry.reason = reason;
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<QueuedEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Handles in evaluation order.
    pub fn handles(&self) -> Vec<DemandHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }
}
