//! Hand-off of the latest [`Snapshot`] from the measurement worker to its consumers.

use crate::aggregate::Snapshot;
use crate::chain::lock;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Slot {
    generation: u64,
    snapshot: Option<Snapshot>,
}

/// Holds only the most recent snapshot. A consumer that falls behind skips the snapshots
/// it missed instead of working through a backlog.
#[derive(Default)]
pub struct LatestSnapshot {
    slot: Mutex<Slot>,
    published: Condvar,
}

impl LatestSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored snapshot and wakes every waiting consumer.
    pub fn publish(&self, snapshot: Snapshot) -> u64 {
        let mut slot = lock(&self.slot);
        slot.generation += 1;
        slot.snapshot = Some(snapshot);
        self.published.notify_all();
        slot.generation
    }

    /// The stored snapshot and its generation, if anything was published yet.
    pub fn latest(&self) -> Option<(u64, Snapshot)> {
        let slot = lock(&self.slot);
        slot.snapshot.clone().map(|s| (slot.generation, s))
    }

    /// Blocks until a snapshot newer than generation `seen` is available. Pass 0 to get
    /// whatever was published first.
    pub fn wait_newer(&self, seen: u64) -> (u64, Snapshot) {
        let mut slot = lock(&self.slot);
        loop {
            if slot.generation > seen {
                if let Some(snapshot) = &slot.snapshot {
                    return (slot.generation, snapshot.clone());
                }
            }
            slot = self
                .published
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`LatestSnapshot::wait_newer`] but gives up after `timeout`.
    pub fn wait_newer_timeout(&self, seen: u64, timeout: Duration) -> Option<(u64, Snapshot)> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.slot);
        loop {
            if slot.generation > seen {
                if let Some(snapshot) = &slot.snapshot {
                    return Some((slot.generation, snapshot.clone()));
                }
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            slot = self
                .published
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
