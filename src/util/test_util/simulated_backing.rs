use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::conversions::raw_align_down;
use crate::util::heap::backing_store::{BackingStore, MemfdBackingStore};
use crate::util::Address;

// Sparse, so only the pages tests actually touch use memory.
const BACKING_FILE_SIZE: usize = 1 << 30;

/// A backing store with a commit quota, optionally unable to uncommit. Reservation and mapping
/// go to a real memfd store so mapped memory can be touched; commit and uncommit are only
/// accounted.
pub struct SimulatedBackingStore {
    inner: MemfdBackingStore,
    granule_size: usize,
    quota: AtomicUsize,
    supports_uncommit: bool,
    pub commit_calls: AtomicUsize,
    pub uncommit_calls: AtomicUsize,
}

impl SimulatedBackingStore {
    /// A store that lets at most `quota` bytes be committed at any time.
    pub fn new(quota: usize, granule_size: usize) -> Self {
        Self::with_options(quota, granule_size, true)
    }

    pub fn without_uncommit(quota: usize, granule_size: usize) -> Self {
        Self::with_options(quota, granule_size, false)
    }

    fn with_options(quota: usize, granule_size: usize, supports_uncommit: bool) -> Self {
        SimulatedBackingStore {
            inner: MemfdBackingStore::new(BACKING_FILE_SIZE, granule_size).unwrap(),
            granule_size,
            quota: AtomicUsize::new(quota),
            supports_uncommit,
            commit_calls: AtomicUsize::new(0),
            uncommit_calls: AtomicUsize::new(0),
        }
    }

    /// Bytes that can still be committed.
    pub fn remaining_quota(&self) -> usize {
        self.quota.load(Ordering::SeqCst)
    }

    pub fn set_quota(&self, quota: usize) {
        self.quota.store(quota, Ordering::SeqCst);
    }
}

impl BackingStore for SimulatedBackingStore {
    fn reserve(&self, size: usize) -> Option<Address> {
        self.inner.reserve(size)
    }

    fn commit(&self, _offset: usize, size: usize) -> usize {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let available = raw_align_down(self.quota.load(Ordering::SeqCst), self.granule_size);
        let granted = size.min(available);
        self.quota.fetch_sub(granted, Ordering::SeqCst);
        granted
    }

    fn uncommit(&self, _offset: usize, size: usize) -> usize {
        self.uncommit_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supports_uncommit {
            return 0;
        }
        self.quota.fetch_add(size, Ordering::SeqCst);
        size
    }

    fn map(&self, addr: Address, size: usize, offset: usize) -> bool {
        self.inner.map(addr, size, offset)
    }

    fn unmap(&self, addr: Address, size: usize) -> bool {
        self.inner.unmap(addr, size)
    }
}
