use enum_map::EnumMap;

use super::copy_allocator::{AllocationPath, Generation};
use crate::scheduler::TaskQueueStats;

/// Counters of one promotion manager for one cycle. Only reported, never acted upon.
#[derive(Clone, Debug, Default)]
pub struct PromotionStats {
    pub allocations: EnumMap<Generation, EnumMap<AllocationPath, usize>>,
    /// Objects copied, to either generation.
    pub objects_copied: usize,
    pub bytes_copied: usize,
    /// The subset of the copies that went to the old generation.
    pub objects_promoted: usize,
    pub bytes_promoted: usize,
    /// Copies discarded because another worker forwarded the object first.
    pub cas_races_lost: usize,
    pub unallocated: usize,
    pub fillers: usize,
    pub lab_waste: usize,
    pub arrays_chunked: usize,
    pub array_chunks_processed: usize,
    /// Array chunk tasks pushed and stolen.
    pub masked_pushes: usize,
    pub masked_steals: usize,
    pub queue: TaskQueueStats,
}

impl PromotionStats {
    pub fn merge(&mut self, other: &PromotionStats) {
        for (generation, paths) in other.allocations.iter() {
            for (path, count) in paths.iter() {
                self.allocations[generation][path] += count;
            }
        }
        self.objects_copied += other.objects_copied;
        self.bytes_copied += other.bytes_copied;
        self.objects_promoted += other.objects_promoted;
        self.bytes_promoted += other.bytes_promoted;
        self.cas_races_lost += other.cas_races_lost;
        self.unallocated += other.unallocated;
        self.fillers += other.fillers;
        self.lab_waste += other.lab_waste;
        self.arrays_chunked += other.arrays_chunked;
        self.array_chunks_processed += other.array_chunks_processed;
        self.masked_pushes += other.masked_pushes;
        self.masked_steals += other.masked_steals;
        self.queue.merge(&other.queue);
    }

    pub fn log(&self, worker: usize) {
        debug!(
            "Worker {}: copied {} objects ({} bytes), promoted {} ({} bytes), lost {} races",
            worker,
            self.objects_copied,
            self.bytes_copied,
            self.objects_promoted,
            self.bytes_promoted,
            self.cas_races_lost
        );
        debug!(
            "Worker {}: young {:?}, old {:?}, waste {} bytes",
            worker,
            self.allocations[Generation::Young],
            self.allocations[Generation::Old],
            self.lab_waste
        );
        debug!(
            "Worker {}: masked pushes {} steals {}, arrays chunked {} chunks processed {}, queue {:?}",
            worker,
            self.masked_pushes,
            self.masked_steals,
            self.arrays_chunked,
            self.array_chunks_processed,
            self.queue
        );
    }
}

/// What one worker could not promote in a cycle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PromotionFailedInfo {
    pub worker: usize,
    pub count: usize,
    pub first_size: usize,
    pub smallest_size: usize,
    pub total_size: usize,
}

impl PromotionFailedInfo {
    pub fn new(worker: usize) -> Self {
        PromotionFailedInfo {
            worker,
            ..Default::default()
        }
    }

    pub fn register_copy_failure(&mut self, size: usize) {
        if self.count == 0 {
            self.first_size = size;
            self.smallest_size = size;
        } else {
            self.smallest_size = self.smallest_size.min(size);
        }
        self.count += 1;
        self.total_size += size;
    }

    pub fn has_failed(&self) -> bool {
        self.count > 0
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_info() {
        let mut info = PromotionFailedInfo::new(3);
        assert!(!info.has_failed());
        info.register_copy_failure(64);
        info.register_copy_failure(32);
        info.register_copy_failure(128);
        assert_eq!(info.worker, 3);
        assert_eq!(info.count, 3);
        assert_eq!(info.first_size, 64);
        assert_eq!(info.smallest_size, 32);
        assert_eq!(info.total_size, 224);
        info.reset();
        assert_eq!(info, PromotionFailedInfo::new(3));
    }

    #[test]
    fn merge_adds_up() {
        let mut a = PromotionStats::default();
        a.allocations[Generation::Old][AllocationPath::Direct] = 2;
        a.objects_copied = 5;
        a.queue.overflow_max_len = 7;
        let mut b = PromotionStats::default();
        b.allocations[Generation::Old][AllocationPath::Direct] = 1;
        b.objects_copied = 1;
        b.queue.overflow_max_len = 3;
        a.merge(&b);
        assert_eq!(a.allocations[Generation::Old][AllocationPath::Direct], 3);
        assert_eq!(a.objects_copied, 6);
        assert_eq!(a.queue.overflow_max_len, 7);
    }
}
