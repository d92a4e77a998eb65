use std::sync::{Mutex, MutexGuard};

/// Native memory accounting of the heap backing: how much address space is reserved, how
/// much physical memory is committed and how much is mapped into views.
///
/// Updates go through [`MemoryTracker::lock`], and the physical memory manager performs the
/// backing store operation while holding the guard, so readers never see the accounting
/// out of step with the mappings.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    state: Mutex<MemoryUsage>,
}

/// A snapshot of tracked memory, in bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub reserved: usize,
    pub committed: usize,
    pub mapped: usize,
}

pub struct TrackerGuard<'a> {
    usage: MutexGuard<'a, MemoryUsage>,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> TrackerGuard<'_> {
        TrackerGuard {
            usage: self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }

    pub fn usage(&self) -> MemoryUsage {
        *self.lock().usage
    }
}

impl TrackerGuard<'_> {
    pub fn record_reserve(&mut self, bytes: usize) {
        self.usage.reserved += bytes;
    }

    pub fn record_commit(&mut self, bytes: usize) {
        self.usage.committed += bytes;
    }

    pub fn record_uncommit(&mut self, bytes: usize) {
        debug_assert!(self.usage.committed >= bytes);
        self.usage.committed -= bytes;
    }

    pub fn record_map(&mut self, bytes: usize) {
        self.usage.mapped += bytes;
    }

    pub fn record_unmap(&mut self, bytes: usize) {
        debug_assert!(self.usage.mapped >= bytes);
        self.usage.mapped -= bytes;
    }
}
