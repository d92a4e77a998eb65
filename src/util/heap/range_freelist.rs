use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

/// A coalescing free list of `[start, end)` ranges, used for both the physical offset space
/// and the virtual offset space. Not synchronized.
#[derive(Debug, Default)]
pub struct RangeFreeList {
    // start -> end
    ranges: BTreeMap<usize, usize>,
}

impl RangeFreeList {
    pub fn new() -> Self {
        RangeFreeList {
            ranges: BTreeMap::new(),
        }
    }

    /// A free list holding the single range `[start, start + size)`.
    pub fn with_range(start: usize, size: usize) -> Self {
        let mut list = Self::new();
        list.free(start, size);
        list
    }

    /// Take `size` bytes from the lowest range that can hold them.
    pub fn alloc_low_address(&mut self, size: usize) -> Option<usize> {
        let (&start, &end) = self.ranges.iter().find(|&(&s, &e)| e - s >= size)?;
        self.ranges.remove(&start);
        if start + size < end {
            self.ranges.insert(start + size, end);
        }
        Some(start)
    }

    /// Take up to `size` bytes from the lowest range. Returns the start and the number of bytes
    /// taken, which may be less than requested.
    pub fn alloc_low_address_at_most(&mut self, size: usize) -> Option<(usize, usize)> {
        let (&start, &end) = self.ranges.iter().next()?;
        self.ranges.remove(&start);
        let taken = size.min(end - start);
        if start + taken < end {
            self.ranges.insert(start + taken, end);
        }
        Some((start, taken))
    }

    /// Take `size` bytes from the top of the highest range that can hold them.
    pub fn alloc_high_address(&mut self, size: usize) -> Option<usize> {
        let (&start, &end) = self.ranges.iter().rev().find(|&(&s, &e)| e - s >= size)?;
        if end - start == size {
            self.ranges.remove(&start);
        } else {
            self.ranges.insert(start, end - size);
        }
        Some(end - size)
    }

    /// Return `[start, start + size)`, coalescing with adjacent free ranges.
    pub fn free(&mut self, start: usize, size: usize) {
        if size == 0 {
            return;
        }
        let mut new_start = start;
        let mut new_end = start + size;

        if let Some((&prev_start, &prev_end)) =
            self.ranges.range((Unbounded, Included(start))).next_back()
        {
            assert!(
                prev_end <= start,
                "Freeing [{:#x}, {:#x}) overlaps free range [{:#x}, {:#x})",
                start,
                new_end,
                prev_start,
                prev_end
            );
            if prev_end == start {
                self.ranges.remove(&prev_start);
                new_start = prev_start;
            }
        }

        if let Some((&next_start, &next_end)) =
            self.ranges.range((Excluded(start), Unbounded)).next()
        {
            assert!(
                new_end <= next_start,
                "Freeing [{:#x}, {:#x}) overlaps free range [{:#x}, {:#x})",
                start,
                start + size,
                next_start,
                next_end
            );
            if new_end == next_start {
                self.ranges.remove(&next_start);
                new_end = next_end;
            }
        }

        self.ranges.insert(new_start, new_end);
    }

    pub fn free_bytes(&self) -> usize {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    pub fn nranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
