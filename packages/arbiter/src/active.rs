//! The active set: demands currently driving the device.
//!
//! Only the arbitration loop holds a mutable reference. Entries are kept in
//! admission order so iteration (and therefore composition and event order)
//! is deterministic.

use tokio::time::Instant;

use crate::capability::{Channel, ChannelSet};
use crate::demand::{Demand, DemandHandle, Span};

#[derive(Debug, Clone)]
pub struct ActiveEntry {
    pub handle: DemandHandle,
    pub demand: Demand,
    /// Submission sequence number, used as the FIFO tie-break.
    pub seq: u64,
    pub channels: ChannelSet,
    pub admitted_at: Instant,
    /// `None` for continuous demands.
    pub expires_at: Option<Instant>,
}

impl ActiveEntry {
    pub fn new(handle: DemandHandle, demand: Demand, seq: u64, now: Instant) -> Self {
        let expires_at = match demand.span {
            // A span past the clock's range never expires.
            Span::OneShot(duration) => now.checked_add(duration),
            Span::Continuous => None,
        };
        Self {
            handle,
            channels: demand.channels(),
            demand,
            seq,
            admitted_at: now,
            expires_at,
        }
    }
}

#[derive(Debug, Default)]
pub struct ActiveSet {
    entries: Vec<ActiveEntry>,
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveEntry> {
        self.entries.iter()
    }

    pub fn handles(&self) -> Vec<DemandHandle> {
        self.entries.iter().map(|e| e.handle).collect()
    }

    pub fn get(&self, handle: &DemandHandle) -> Option<&ActiveEntry> {
        self.entries.iter().find(|e| e.handle == *handle)
    }

    pub fn contains(&self, handle: &DemandHandle) -> bool {
        self.get(handle).is_some()
    }

    /// The active exclusive demand, if any.
    pub fn exclusive(&self) -> Option<&ActiveEntry> {
        self.entries.iter().find(|e| e.demand.is_exclusive())
    }

    /// Active demands claiming any of `channels`.
    pub fn claiming(&self, channels: ChannelSet) -> impl Iterator<Item = &ActiveEntry> {
        self.entries
            .iter()
            .filter(move |e| e.channels.overlaps(channels))
    }

    /// The demand currently owning `channel`.
    pub fn owner_of(&self, channel: Channel) -> Option<&ActiveEntry> {
        self.entries
            .iter()
            .filter(|e| e.channels.contains(channel))
            .max_by(|a, b| {
                a.demand
                    .priority
                    .cmp(&b.demand.priority)
                    .then(b.seq.cmp(&a.seq))
            })
    }

    pub fn claimed_channels(&self) -> ChannelSet {
        self.entries
            .iter()
            .fold(ChannelSet::EMPTY, |acc, e| acc.union(e.channels))
    }

    pub(crate) fn insert(&mut self, entry: ActiveEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn remove(&mut self, handle: &DemandHandle) -> Option<ActiveEntry> {
        let idx = self.entries.iter().position(|e| e.handle == *handle)?;
        Some(self.entries.remove(idx))
    }

    pub(crate) fn drain(&mut self) -> Vec<ActiveEntry> {
        std::mem::take(&mut self.entries)
    }

    /// Earliest one-shot expiry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.iter().filter_map(|e| e.expires_at).min()
    }

    /// Handles whose one-shot span has elapsed at `now`, in admission order.
    pub fn expired(&self, now: Instant) -> Vec<DemandHandle> {
        self.entries
            .iter()
            .filter(|e| e.expires_at.is_some_and(|at| at <= now))
            .map(|e| e.handle)
            .collect()
    }

    /// Check the structural invariants: at most one exclusive demand and no
    /// two demands sharing a channel.
    pub fn check_invariants(&self) -> Result<(), String> {
        let exclusive = self.entries.iter().filter(|e| e.demand.is_exclusive()).count();
        if exclusive > 1 {
            return Err(format!("{} exclusive demands active", exclusive));
        }

        let mut claimed = ChannelSet::EMPTY;
        for entry in &self.entries {
            if entry.channels.overlaps(claimed) {
                return Err(format!(
                    "demand {} claims {} which is already owned",
                    entry.handle,
                    entry.channels.intersection(claimed)
                ));
            }
            claimed = claimed.union(entry.channels);
        }
        Ok(())
    }
}
