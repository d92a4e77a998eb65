use super::range_freelist::RangeFreeList;
use crate::util::conversions::raw_is_aligned;

/// A range of the reserved virtual offset space. The same offset exists in every heap view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VirtualRegion {
    start: usize,
    size: usize,
}

impl VirtualRegion {
    pub const fn new(start: usize, size: usize) -> Self {
        VirtualRegion { start, size }
    }

    pub const fn start(&self) -> usize {
        self.start
    }

    pub const fn end(&self) -> usize {
        self.start + self.size
    }

    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Carves the reserved virtual offset space into regions. Small requests come from the low
/// end, everything else from the high end, so that short-lived small regions do not
/// fragment the space large regions need. Callers serialize access.
#[derive(Debug)]
pub struct RegionAllocator {
    free: RangeFreeList,
    capacity: usize,
    granule_size: usize,
    small_page_size: usize,
}

impl RegionAllocator {
    pub fn new(capacity: usize, granule_size: usize, small_page_size: usize) -> Self {
        assert!(raw_is_aligned(capacity, granule_size));
        info!(
            "Region allocator: {} MB of address space, small region threshold {} KB",
            capacity >> 20,
            small_page_size >> 10
        );
        RegionAllocator {
            free: RangeFreeList::with_range(0, capacity),
            capacity,
            granule_size,
            small_page_size,
        }
    }

    /// Allocate a region of `size` bytes, or `None` if no free range is large enough.
    pub fn try_alloc(&mut self, size: usize, force_low_address: bool) -> Option<VirtualRegion> {
        assert!(
            size > 0 && raw_is_aligned(size, self.granule_size),
            "Region size {} is not a multiple of the granule size {}",
            size,
            self.granule_size
        );
        let start = if force_low_address || size <= self.small_page_size {
            self.free.alloc_low_address(size)
        } else {
            self.free.alloc_high_address(size)
        }?;
        trace!("Allocated virtual region [{:#x}, {:#x})", start, start + size);
        Some(VirtualRegion::new(start, size))
    }

    /// Allocate a region of `size` bytes. The address space is sized for the maximum heap, so
    /// running out of it is fatal.
    pub fn alloc(&mut self, size: usize, force_low_address: bool) -> VirtualRegion {
        match self.try_alloc(size, force_low_address) {
            Some(region) => region,
            None => panic!(
                "Out of address space: cannot allocate {} bytes ({} bytes free of {})",
                size,
                self.free.free_bytes(),
                self.capacity
            ),
        }
    }

    pub fn free(&mut self, region: VirtualRegion) {
        trace!(
            "Freed virtual region [{:#x}, {:#x})",
            region.start(),
            region.end()
        );
        self.free.free(region.start(), region.size());
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_bytes(&self) -> usize {
        self.free.free_bytes()
    }
}
