use std::ops::Range;

use crate::util::constants::OBJECT_ALIGNMENT;
use crate::util::object_model;
use crate::util::Address;

/// A bump-pointer arena over a region handed out by a space. Owned by one worker, so nothing
/// here is synchronized.
#[derive(Debug)]
pub struct LocalAllocBuffer {
    start: Address,
    cursor: Address,
    limit: Address,
}

impl Default for LocalAllocBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAllocBuffer {
    /// An empty buffer. Every allocation fails until it is reinitialized.
    pub const fn new() -> Self {
        LocalAllocBuffer {
            start: Address::ZERO,
            cursor: Address::ZERO,
            limit: Address::ZERO,
        }
    }

    /// Start bumping through `region`. The previous region must have been flushed.
    pub fn reinitialize(&mut self, region: Range<Address>) {
        debug_assert!(self.is_flushed(), "reinitializing an unflushed buffer");
        debug_assert!(region.start.is_aligned_to(OBJECT_ALIGNMENT));
        debug_assert!(region.end.is_aligned_to(OBJECT_ALIGNMENT));
        self.start = region.start;
        self.cursor = region.start;
        self.limit = region.end;
    }

    pub fn try_alloc(&mut self, size: usize) -> Option<Address> {
        debug_assert!(size % OBJECT_ALIGNMENT == 0);
        if self.limit - self.cursor >= size {
            let result = self.cursor;
            self.cursor = result + size;
            Some(result)
        } else {
            None
        }
    }

    /// Give back the most recent allocation. Returns false, changing nothing, if `object` was
    /// not the last thing allocated from this buffer.
    pub fn unallocate(&mut self, object: Address, size: usize) -> bool {
        if !self.cursor.is_zero() && object + size == self.cursor && object >= self.start {
            self.cursor = object;
            true
        } else {
            false
        }
    }

    /// Plug the unused tail with a filler and detach from the region.
    /// Returns the number of bytes wasted.
    pub fn flush(&mut self) -> usize {
        let waste = self.remaining();
        if waste > 0 {
            object_model::fill_with_object(self.cursor, waste);
        }
        *self = Self::new();
        waste
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn used(&self) -> usize {
        self.cursor - self.start
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.limit
    }

    pub fn is_flushed(&self) -> bool {
        self.limit.is_zero()
    }
}
