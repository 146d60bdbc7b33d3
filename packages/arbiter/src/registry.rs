//! Stream registry: every continuous demand, by handle.
//!
//! A continuous demand is registered as soon as it is accepted for
//! arbitration (admitted or queued) and stays registered until it is
//! cancelled or terminated. Cancelling is idempotent: a second cancel, or a
//! cancel for a handle that already finished, reports `NotFound`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::demand::{DemandHandle, DemandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEntry {
    pub kind: DemandKind,
    pub seq: u64,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<DemandHandle, StreamEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handle: DemandHandle, kind: DemandKind, seq: u64) {
        self.streams.insert(handle, StreamEntry { kind, seq });
    }

    pub fn cancel(&mut self, handle: &DemandHandle) -> CancelOutcome {
        match self.streams.remove(handle) {
            Some(_) => CancelOutcome::Ok,
            None => CancelOutcome::NotFound,
        }
    }

    /// Registered handles in submission order.
    pub fn list_active(&self) -> Vec<DemandHandle> {
        let mut handles: Vec<_> = self.streams.iter().map(|(h, e)| (e.seq, *h)).collect();
        handles.sort_unstable();
        handles.into_iter().map(|(_, h)| h).collect()
    }

    pub fn contains(&self, handle: &DemandHandle) -> bool {
        self.streams.contains_key(handle)
    }

    pub fn get(&self, handle: &DemandHandle) -> Option<&StreamEntry> {
        self.streams.get(handle)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let mut registry = StreamRegistry::new();
        let handle = DemandHandle::new();
        registry.register(handle, DemandKind::Input, 0);

        assert_eq!(registry.cancel(&handle), CancelOutcome::Ok);
        assert_eq!(registry.cancel(&handle), CancelOutcome::NotFound);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_active_in_submission_order() {
        let mut registry = StreamRegistry::new();
        let handles: Vec<_> = (0..5).map(|_| DemandHandle::new()).collect();
        for (seq, handle) in handles.iter().enumerate().rev() {
            registry.register(*handle, DemandKind::Input, seq as u64);
        }

        assert_eq!(registry.list_active(), handles);
    }

    #[test]
    fn test_unknown_handle_not_found() {
        let mut registry = StreamRegistry::new();
        assert_eq!(registry.cancel(&DemandHandle::new()), CancelOutcome::NotFound);
    }
}
