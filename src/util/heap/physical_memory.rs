use std::sync::Arc;

use super::backing_store::BackingStore;
use super::memory_tracker::{MemoryTracker, MemoryUsage};
use super::range_freelist::RangeFreeList;
use super::segment::{Segment, SegmentLedger};
use crate::util::conversions::raw_is_aligned;
use crate::util::Address;

/// Owns the physical backing: which physical offsets are free, committing and uncommitting
/// segments, and mapping them into every heap view. Callers serialize access; the page
/// allocator keeps this behind its lock.
pub struct PhysicalMemoryManager {
    store: Arc<dyn BackingStore>,
    free: RangeFreeList,
    tracker: MemoryTracker,
    views: Vec<Address>,
    address_space_size: usize,
    granule_size: usize,
    uncommit_enabled: bool,
}

impl PhysicalMemoryManager {
    /// Reserve `nviews` views of `address_space_size` bytes each, and manage `max_capacity`
    /// bytes of physical memory. Returns `None` if the address space cannot be reserved.
    pub fn new(
        store: Arc<dyn BackingStore>,
        max_capacity: usize,
        address_space_size: usize,
        nviews: usize,
        granule_size: usize,
        uncommit: bool,
    ) -> Option<Self> {
        assert!(nviews >= 1);
        assert!(raw_is_aligned(max_capacity, granule_size));
        assert!(raw_is_aligned(address_space_size, granule_size));

        let total = address_space_size * nviews;
        let base = store.reserve(total)?;
        let views: Vec<Address> = (0..nviews)
            .map(|i| base + i * address_space_size)
            .collect();
        info!(
            "Address space: {} - {} ({} view(s) of {} MB)",
            base,
            base + total,
            nviews,
            address_space_size >> 20
        );

        let tracker = MemoryTracker::new();
        tracker.lock().record_reserve(total);

        Some(PhysicalMemoryManager {
            store,
            free: RangeFreeList::with_range(0, max_capacity),
            tracker,
            views,
            address_space_size,
            granule_size,
            uncommit_enabled: uncommit,
        })
    }

    /// Probe whether uncommitting works by committing and uncommitting one granule. If it
    /// does not, uncommit is disabled for good. Returns whatever the probe left committed,
    /// which the caller owns from now on.
    pub fn try_enable_uncommit(&mut self, min_capacity: usize, max_capacity: usize) -> SegmentLedger {
        if !self.uncommit_enabled {
            info!("Uncommit: Disabled");
            return SegmentLedger::new();
        }

        if min_capacity >= max_capacity {
            info!("Uncommit: Implicitly Disabled (minimum heap size equals maximum heap size)");
            self.uncommit_enabled = false;
            return SegmentLedger::new();
        }

        let mut probe = SegmentLedger::new();
        self.alloc(&mut probe, self.granule_size);
        let supported = self.commit(&mut probe) && self.uncommit(&mut probe);
        let leftover = probe.split_committed();
        self.free(&probe);

        if supported {
            info!("Uncommit: Enabled");
        } else {
            info!("Uncommit: Implicitly Disabled (not supported by the backing store)");
            self.uncommit_enabled = false;
        }
        leftover
    }

    pub fn uncommit_enabled(&self) -> bool {
        self.uncommit_enabled
    }

    /// Allocate `size` bytes of uncommitted physical memory into `pmem`, possibly as several
    /// disjoint segments. Physical memory is provisioned for the maximum heap, so running
    /// out here is an accounting bug and fatal.
    pub fn alloc(&mut self, pmem: &mut SegmentLedger, size: usize) {
        assert!(raw_is_aligned(size, self.granule_size));
        let mut remaining = size;
        while remaining > 0 {
            let (start, allocated) = match self.free.alloc_low_address_at_most(remaining) {
                Some(r) => r,
                None => panic!(
                    "Out of physical memory: {} of {} bytes still needed",
                    remaining, size
                ),
            };
            pmem.add(Segment::new(start, allocated, false));
            remaining -= allocated;
        }
    }

    /// Return uncommitted physical memory to the free pool.
    pub fn free(&mut self, pmem: &SegmentLedger) {
        for segment in pmem.segments() {
            assert!(
                !segment.is_committed(),
                "Freeing committed physical memory {:?}",
                segment
            );
            self.free.free(segment.start(), segment.size());
        }
    }

    /// Commit every uncommitted segment of `pmem`. Returns false as soon as the backing store
    /// commits less than asked; `pmem` then records exactly what got committed.
    pub fn commit(&mut self, pmem: &mut SegmentLedger) -> bool {
        let mut i = 0;
        while i < pmem.nsegments() {
            let segment = *pmem.segment(i);
            if !segment.is_committed() {
                let committed = {
                    let mut tracker = self.tracker.lock();
                    let committed = self.store.commit(segment.start(), segment.size());
                    tracker.record_commit(committed);
                    committed
                };
                if !pmem.commit_segment(i, committed) {
                    warn!(
                        "Partial commit: {} of {} bytes at physical offset {:#x}",
                        committed,
                        segment.size(),
                        segment.start()
                    );
                    return false;
                }
            }
            i += 1;
        }
        true
    }

    /// Uncommit every committed segment of `pmem`. Returns false as soon as the backing store
    /// uncommits less than asked; `pmem` then records exactly what got uncommitted.
    pub fn uncommit(&mut self, pmem: &mut SegmentLedger) -> bool {
        let mut i = 0;
        while i < pmem.nsegments() {
            let segment = *pmem.segment(i);
            if segment.is_committed() {
                let uncommitted = {
                    let mut tracker = self.tracker.lock();
                    let uncommitted = self.store.uncommit(segment.start(), segment.size());
                    tracker.record_uncommit(uncommitted);
                    uncommitted
                };
                if !pmem.uncommit_segment(i, uncommitted) {
                    debug!(
                        "Partial uncommit: {} of {} bytes at physical offset {:#x}",
                        uncommitted,
                        segment.size(),
                        segment.start()
                    );
                    return false;
                }
            }
            i += 1;
        }
        true
    }

    /// Map the committed memory `pmem` at virtual `offset` in every view.
    pub fn map(&self, offset: usize, pmem: &SegmentLedger) {
        debug_assert_eq!(pmem.committed_size(), pmem.size());
        assert!(offset + pmem.size() <= self.address_space_size);
        let mut tracker = self.tracker.lock();
        for &view in &self.views {
            let mut addr = view + offset;
            for segment in pmem.segments() {
                if !self.store.map(addr, segment.size(), segment.start()) {
                    panic!("Failed to map {} bytes at {}", segment.size(), addr);
                }
                addr += segment.size();
            }
            tracker.record_map(pmem.size());
        }
    }

    /// Unmap `[offset, offset + size)` in every view.
    pub fn unmap(&self, offset: usize, size: usize) {
        let mut tracker = self.tracker.lock();
        for &view in &self.views {
            if !self.store.unmap(view + offset, size) {
                panic!("Failed to unmap {} bytes at {}", size, view + offset);
            }
            tracker.record_unmap(size);
        }
    }

    /// The address of virtual `offset` in view `view`.
    pub fn view_address(&self, view: usize, offset: usize) -> Address {
        self.views[view] + offset
    }

    pub fn nviews(&self) -> usize {
        self.views.len()
    }

    pub fn address_space_size(&self) -> usize {
        self.address_space_size
    }

    pub fn granule_size(&self) -> usize {
        self.granule_size
    }

    pub fn free_bytes(&self) -> usize {
        self.free.free_bytes()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.tracker.usage()
    }
}
