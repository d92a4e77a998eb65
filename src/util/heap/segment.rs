//! Bookkeeping of physical memory in address-sorted segments.
//!
//! Offsets here are offsets into the physical backing store, not virtual addresses. None of
//! these types are synchronized: the page allocator's lock serializes every mutation.

use itertools::Itertools;

/// A contiguous range of physical memory with a single committed state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    start: usize,
    size: usize,
    committed: bool,
}

impl Segment {
    pub const fn new(start: usize, size: usize, committed: bool) -> Self {
        Segment {
            start,
            size,
            committed,
        }
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

    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    fn is_mergeable_with(&self, after: &Segment) -> bool {
        self.end() == after.start() && self.committed == after.committed
    }
}

/// An address-sorted, non-overlapping list of segments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentLedger {
    segments: Vec<Segment>,
}

impl SegmentLedger {
    pub const fn new() -> Self {
        SegmentLedger {
            segments: Vec::new(),
        }
    }

    /// A ledger holding a single segment.
    pub fn from_segment(segment: Segment) -> Self {
        let mut ledger = Self::new();
        ledger.add(segment);
        ledger
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn nsegments(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> &Segment {
        assert!(index < self.segments.len(), "Invalid segment index {}", index);
        &self.segments[index]
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total bytes covered by all segments.
    pub fn size(&self) -> usize {
        self.segments.iter().map(Segment::size).sum()
    }

    /// Bytes covered by committed segments.
    pub fn committed_size(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.is_committed())
            .map(Segment::size)
            .sum()
    }

    /// Insert a segment at `index`. The caller picks an index that keeps the ledger sorted.
    pub fn insert(&mut self, index: usize, start: usize, size: usize, committed: bool) {
        assert!(index <= self.segments.len(), "Invalid segment index {}", index);
        if self.segments.len() == self.segments.capacity() {
            let target = (self.segments.len() + 1).next_power_of_two();
            self.segments.reserve_exact(target - self.segments.len());
        }
        self.segments.insert(index, Segment::new(start, size, committed));
        self.debug_check_sorted();
    }

    pub fn replace(&mut self, index: usize, start: usize, size: usize, committed: bool) {
        assert!(index < self.segments.len(), "Invalid segment index {}", index);
        self.segments[index] = Segment::new(start, size, committed);
        self.debug_check_sorted();
    }

    pub fn remove(&mut self, index: usize) -> Segment {
        assert!(index < self.segments.len(), "Invalid segment index {}", index);
        self.segments.remove(index)
    }

    /// Drop every segment without returning them anywhere.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Insert `segment` in address order, merging it with its neighbours where they touch
    /// and share the committed state.
    pub fn add(&mut self, segment: Segment) {
        if segment.size() == 0 {
            return;
        }
        let index = self
            .segments
            .partition_point(|s| s.start() < segment.start());

        if index > 0 {
            let before = self.segments[index - 1];
            assert!(
                before.end() <= segment.start(),
                "{:?} overlaps {:?}",
                before,
                segment
            );
        }
        if index < self.segments.len() {
            let after = self.segments[index];
            assert!(
                segment.end() <= after.start(),
                "{:?} overlaps {:?}",
                segment,
                after
            );
        }

        let merge_before = index > 0 && self.segments[index - 1].is_mergeable_with(&segment);
        let merge_after =
            index < self.segments.len() && segment.is_mergeable_with(&self.segments[index]);

        match (merge_before, merge_after) {
            (true, true) => {
                let before = self.segments[index - 1];
                let after = self.remove(index);
                self.replace(
                    index - 1,
                    before.start(),
                    before.size() + segment.size() + after.size(),
                    segment.is_committed(),
                );
            }
            (true, false) => {
                let before = self.segments[index - 1];
                self.replace(
                    index - 1,
                    before.start(),
                    before.size() + segment.size(),
                    segment.is_committed(),
                );
            }
            (false, true) => {
                let after = self.segments[index];
                self.replace(
                    index,
                    segment.start(),
                    segment.size() + after.size(),
                    segment.is_committed(),
                );
            }
            (false, false) => {
                self.insert(index, segment.start(), segment.size(), segment.is_committed());
            }
        }
    }

    /// Add every segment of `other`.
    pub fn add_segments(&mut self, other: &SegmentLedger) {
        for segment in other.segments() {
            self.add(*segment);
        }
    }

    /// Mark the first `size` bytes of an uncommitted segment as committed, splitting the
    /// segment when only part of it got committed. Returns whether the whole segment is now
    /// committed.
    pub fn commit_segment(&mut self, index: usize, size: usize) -> bool {
        let segment = *self.segment(index);
        assert!(size <= segment.size(), "Invalid size {} for {:?}", size, segment);
        assert!(!segment.is_committed(), "{:?} is already committed", segment);

        if size == segment.size() {
            self.replace(index, segment.start(), size, true);
            return true;
        }

        if size > 0 {
            self.replace(index, segment.start(), size, true);
            self.insert(
                index + 1,
                segment.start() + size,
                segment.size() - size,
                false,
            );
        }

        false
    }

    /// Mark the first `size` bytes of a committed segment as uncommitted, splitting the
    /// segment when only part of it got uncommitted. Returns whether the whole segment is now
    /// uncommitted.
    pub fn uncommit_segment(&mut self, index: usize, size: usize) -> bool {
        let segment = *self.segment(index);
        assert!(size <= segment.size(), "Invalid size {} for {:?}", size, segment);
        assert!(segment.is_committed(), "{:?} is not committed", segment);

        if size == segment.size() {
            self.replace(index, segment.start(), size, false);
            return true;
        }

        if size > 0 {
            self.replace(index, segment.start(), size, false);
            self.insert(
                index + 1,
                segment.start() + size,
                segment.size() - size,
                true,
            );
        }

        false
    }

    /// Detach the first `size` bytes worth of segments into a new ledger. A segment that
    /// straddles the boundary is split.
    pub fn split(&mut self, size: usize) -> SegmentLedger {
        assert!(
            size <= self.size(),
            "Cannot split {} bytes from a ledger of {} bytes",
            size,
            self.size()
        );
        let mut taken = SegmentLedger::new();
        let mut taken_size = 0;
        let mut kept = Vec::with_capacity(self.segments.len());

        for segment in self.segments.drain(..) {
            if taken_size < size {
                if taken_size + segment.size() <= size {
                    taken_size += segment.size();
                    taken.add(segment);
                } else {
                    let split_size = size - taken_size;
                    taken_size += split_size;
                    taken.add(Segment::new(
                        segment.start(),
                        split_size,
                        segment.is_committed(),
                    ));
                    kept.push(Segment::new(
                        segment.start() + split_size,
                        segment.size() - split_size,
                        segment.is_committed(),
                    ));
                }
            } else {
                kept.push(segment);
            }
        }

        self.segments = kept;
        taken
    }

    /// Detach every committed segment into a new ledger.
    pub fn split_committed(&mut self) -> SegmentLedger {
        let mut taken = SegmentLedger::new();
        let (committed, uncommitted): (Vec<Segment>, Vec<Segment>) =
            self.segments.drain(..).partition(|s| s.is_committed());
        for segment in committed {
            taken.add(segment);
        }
        self.segments = uncommitted;
        taken
    }

    /// Sorted and non-overlapping.
    pub fn is_well_formed(&self) -> bool {
        self.segments
            .iter()
            .tuple_windows()
            .all(|(a, b)| a.end() <= b.start())
    }

    /// No two adjacent segments could be merged.
    pub fn is_minimal(&self) -> bool {
        self.segments
            .iter()
            .tuple_windows()
            .all(|(a, b)| !a.is_mergeable_with(b))
    }

    fn debug_check_sorted(&self) {
        debug_assert!(self.is_well_formed(), "Ledger out of order: {:?}", self.segments);
    }
}
