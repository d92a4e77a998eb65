use atomic::Atomic;

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::util::conversions;
use crate::util::object_model;
use crate::util::{Address, ObjectReference};

/// A contiguous range of memory allocated by bumping a shared cursor. The space owns the
/// address range `[start, reserved_end)`; only `[start, limit)` is usable at any time, and the
/// limit can be moved between cycles to resize the space.
pub struct ContiguousSpace {
    name: &'static str,
    start: Address,
    /// Next free byte. Everything below it is parseable objects.
    top: Atomic<Address>,
    /// Current capacity end.
    limit: Atomic<Address>,
    reserved_end: Address,
    /// Bytes lost to buffer flushes in this space since the last reset.
    waste: AtomicUsize,
}

impl ContiguousSpace {
    pub fn new(name: &'static str, range: Range<Address>, capacity: usize) -> Self {
        let space = ContiguousSpace {
            name,
            start: range.start,
            top: Atomic::new(range.start),
            limit: Atomic::new(range.start),
            reserved_end: range.end,
            waste: AtomicUsize::new(0),
        };
        space.set_capacity(capacity);
        debug!(
            "Space {}: {}..{} capacity {} bytes",
            name, range.start, range.end, capacity
        );
        space
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Allocate `size` bytes with a CAS on the shared cursor. Returns `None` when the space is
    /// at its current capacity. The memory is not formatted.
    pub fn par_alloc(&self, size: usize) -> Option<Address> {
        debug_assert!(conversions::raw_is_aligned(
            size,
            crate::util::constants::OBJECT_ALIGNMENT
        ));
        let limit = self.limit.load(Ordering::Relaxed);
        let result = self
            .top
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |top| {
                if top + size <= limit {
                    Some(top + size)
                } else {
                    None
                }
            });
        match result {
            Ok(top) => Some(top),
            Err(top) => {
                trace!(
                    "Space {} exhausted: {} bytes requested at {}, limit {}",
                    self.name,
                    size,
                    top,
                    limit
                );
                None
            }
        }
    }

    /// Whether `addr` is within the range reserved for this space.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.reserved_end
    }

    pub fn contains_object(&self, object: ObjectReference) -> bool {
        self.contains(object.to_raw_address())
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Acquire)
    }

    pub fn used(&self) -> usize {
        self.top() - self.start
    }

    pub fn capacity(&self) -> usize {
        self.limit.load(Ordering::Relaxed) - self.start
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    /// The largest capacity this space can be resized to.
    pub fn max_capacity(&self) -> usize {
        self.reserved_end - self.start
    }

    /// Move the capacity limit. Only called while no thread allocates in the space.
    pub fn set_capacity(&self, capacity: usize) {
        assert!(
            capacity <= self.max_capacity(),
            "Space {}: capacity {} exceeds reservation {}",
            self.name,
            capacity,
            self.max_capacity()
        );
        assert!(
            capacity >= self.used(),
            "Space {}: capacity {} is below used {}",
            self.name,
            capacity,
            self.used()
        );
        self.limit.store(self.start + capacity, Ordering::Relaxed);
    }

    /// Discard every object in the space.
    pub fn reset(&self) {
        self.top.store(self.start, Ordering::Release);
        self.waste.store(0, Ordering::Relaxed);
    }

    pub fn record_waste(&self, bytes: usize) {
        self.waste.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn waste(&self) -> usize {
        self.waste.load(Ordering::Relaxed)
    }

    /// Visit every object, fillers included, from the bottom of the space to its top. Only
    /// valid while no thread allocates in the space.
    pub fn object_iterate<F: FnMut(ObjectReference)>(&self, mut f: F) {
        let top = self.top();
        let mut cursor = self.start;
        while cursor < top {
            let object = ObjectReference::from_raw_address(cursor);
            let size = object_model::object_size(object);
            f(object);
            cursor += size;
        }
        assert_eq!(cursor, top, "Space {} is not parseable", self.name);
    }
}

impl std::fmt::Debug for ContiguousSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}..{} used {} capacity {}]",
            self.name,
            self.start,
            self.reserved_end,
            self.used(),
            self.capacity()
        )
    }
}
