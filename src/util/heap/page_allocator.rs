use std::sync::{Arc, Mutex, MutexGuard};

use super::backing_store::BackingStore;
use super::memory_tracker::MemoryUsage;
use super::physical_memory::PhysicalMemoryManager;
use super::region_allocator::{RegionAllocator, VirtualRegion};
use super::segment::SegmentLedger;
use crate::util::conversions::{raw_align_down, raw_align_up};
use crate::util::options::Options;
use crate::util::Address;

/// A mapped, committed range of heap memory.
#[derive(Debug)]
pub struct Page {
    region: VirtualRegion,
    physical: SegmentLedger,
    start: Address,
}

impl Page {
    /// The start of the page in the first view.
    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.region.size()
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }

    pub fn region(&self) -> VirtualRegion {
        self.region
    }

    pub fn physical(&self) -> &SegmentLedger {
        &self.physical
    }
}

struct PageAllocatorInner {
    virtual_memory: RegionAllocator,
    physical: PhysicalMemoryManager,
    // Committed, unmapped physical memory ready for reuse.
    cache: SegmentLedger,
    min_capacity: usize,
    max_capacity: usize,
    capacity: usize,
    used: usize,
}

/// Hands out committed pages, composing the region allocator and the physical memory
/// manager under a single heap allocation lock.
pub struct PageAllocator {
    inner: Mutex<PageAllocatorInner>,
    granule_size: usize,
}

impl PageAllocator {
    /// Set up the page allocator for the heap sizes in `options`. Returns `None` if the
    /// address space cannot be reserved.
    pub fn new(store: Arc<dyn BackingStore>, options: &Options) -> Option<Self> {
        let granule_size = options.granule_size;
        let max_capacity = raw_align_up(options.max_heap_size, granule_size);
        let min_capacity = raw_align_up(options.effective_min_heap_size(), granule_size);
        let address_space_size = max_capacity * options.virtual_to_physical_ratio;

        let mut physical = PhysicalMemoryManager::new(
            store,
            max_capacity,
            address_space_size,
            options.heap_views,
            granule_size,
            options.uncommit,
        )?;
        let cache = physical.try_enable_uncommit(min_capacity, max_capacity);
        let capacity = cache.committed_size();

        info!(
            "Page allocator: min capacity {} MB, max capacity {} MB",
            min_capacity >> 20,
            max_capacity >> 20
        );

        Some(PageAllocator {
            inner: Mutex::new(PageAllocatorInner {
                virtual_memory: RegionAllocator::new(
                    address_space_size,
                    granule_size,
                    options.small_page_size,
                ),
                physical,
                cache,
                min_capacity,
                max_capacity,
                capacity,
                used: 0,
            }),
            granule_size,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PageAllocatorInner> {
        self.inner.lock().unwrap()
    }

    /// Allocate a page of at least `size` bytes, committed and mapped in every view. Returns
    /// `None` when the heap is at its maximum capacity or the backing store cannot commit
    /// enough memory.
    pub fn alloc_page(&self, size: usize) -> Option<Page> {
        let size = raw_align_up(size, self.granule_size);
        let mut inner = self.lock();
        let inner = &mut *inner;

        if inner.used + size > inner.max_capacity {
            debug!(
                "Page allocation of {} bytes failed: {} of {} bytes in use",
                size, inner.used, inner.max_capacity
            );
            return None;
        }

        let region = inner.virtual_memory.alloc(size, false);

        // Reuse committed memory first, then fill up with fresh physical memory.
        let from_cache = size.min(inner.cache.size());
        let mut pmem = inner.cache.split(from_cache);
        let mut fresh = SegmentLedger::new();
        if from_cache < size {
            inner.physical.alloc(&mut fresh, size - from_cache);
            if !inner.physical.commit(&mut fresh) {
                let committed = fresh.split_committed();
                inner.capacity += committed.size();
                inner.cache.add_segments(&committed);
                inner.cache.add_segments(&pmem);
                inner.physical.free(&fresh);
                inner.virtual_memory.free(region);
                warn!("Page allocation of {} bytes failed: commit failed", size);
                return None;
            }
            inner.capacity += fresh.size();
        }
        pmem.add_segments(&fresh);

        inner.physical.map(region.start(), &pmem);
        inner.used += size;

        let start = inner.physical.view_address(0, region.start());
        trace!("Allocated page {}..{}", start, start + size);
        Some(Page {
            region,
            physical: pmem,
            start,
        })
    }

    /// Unmap the page and keep its physical memory committed for reuse.
    pub fn free_page(&self, page: Page) {
        let mut inner = self.lock();
        let inner = &mut *inner;
        inner.physical.unmap(page.region.start(), page.size());
        inner.virtual_memory.free(page.region);
        inner.cache.add_segments(&page.physical);
        inner.used -= page.size();
        trace!("Freed page {}..{}", page.start(), page.end());
    }

    /// Return up to `max_bytes` of cached committed memory to the backing store, never going
    /// below the minimum capacity. Returns the number of bytes uncommitted.
    pub fn uncommit(&self, max_bytes: usize) -> usize {
        let mut inner = self.lock();
        let inner = &mut *inner;
        if !inner.physical.uncommit_enabled() {
            return 0;
        }

        let retained = inner.capacity.saturating_sub(inner.min_capacity);
        let flush = raw_align_down(
            max_bytes.min(inner.cache.size()).min(retained),
            self.granule_size,
        );
        if flush == 0 {
            return 0;
        }

        let mut flushed = inner.cache.split(flush);
        inner.physical.uncommit(&mut flushed);
        let still_committed = flushed.split_committed();
        inner.cache.add_segments(&still_committed);
        let uncommitted = flushed.size();
        inner.physical.free(&flushed);
        inner.capacity -= uncommitted;

        debug!(
            "Uncommitted {} of {} requested bytes, capacity now {} bytes",
            uncommitted, max_bytes, inner.capacity
        );
        uncommitted
    }

    /// The address of a page in another view.
    pub fn view_address(&self, page: &Page, view: usize) -> Address {
        self.lock().physical.view_address(view, page.region.start())
    }

    pub fn used(&self) -> usize {
        self.lock().used
    }

    /// Committed physical memory, in use or cached.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.lock().max_capacity
    }

    pub fn cached(&self) -> usize {
        self.lock().cache.size()
    }

    pub fn uncommit_enabled(&self) -> bool {
        self.lock().physical.uncommit_enabled()
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.lock().physical.memory_usage()
    }
}
