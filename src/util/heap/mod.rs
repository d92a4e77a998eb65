//! Heap memory bookkeeping: physical segments, virtual regions, and the page allocator that
//! composes them.

pub mod backing_store;
pub mod memory_tracker;
pub mod page_allocator;
pub mod physical_memory;
pub mod range_freelist;
pub mod region_allocator;
pub mod segment;

pub use self::backing_store::BackingStore;
#[cfg(target_os = "linux")]
pub use self::backing_store::MemfdBackingStore;
pub use self::page_allocator::{Page, PageAllocator};
pub use self::physical_memory::PhysicalMemoryManager;
pub use self::region_allocator::{RegionAllocator, VirtualRegion};
pub use self::segment::{Segment, SegmentLedger};
