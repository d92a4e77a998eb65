use crate::util::{Address, ObjectReference};

/// A unit of scan work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanTask {
    /// A reference slot whose referent is in the collection set.
    Slot(Address),
    /// Elements `[start, end)` of an already copied object array that still need scanning.
    ArrayChunk {
        array: ObjectReference,
        start: usize,
        end: usize,
    },
}

impl ScanTask {
    pub fn is_array_chunk(&self) -> bool {
        matches!(self, ScanTask::ArrayChunk { .. })
    }
}

/// Split the pending element range `[start, end)` into the chunk to scan now and the
/// remainder, if any, to push back as a new task.
pub fn next_chunk(
    start: usize,
    end: usize,
    chunk_size: usize,
) -> (std::ops::Range<usize>, Option<(usize, usize)>) {
    debug_assert!(start < end && chunk_size > 0);
    if end - start > chunk_size {
        let split = start + chunk_size;
        (start..split, Some((split, end)))
    } else {
        (start..end, None)
    }
}
