//! The promotion engine: per-worker promotion managers that copy live objects out of the
//! collection set, claim them with a CAS on the header, and scan the copies.

pub mod copy_allocator;
pub mod preserved_marks;
pub mod stats;

use crate::heap::GenerationalHeap;
use crate::scheduler::task::next_chunk;
use crate::scheduler::{OverflowTaskQueue, ScanTask, TaskQueueSet, Terminator};
use crate::util::object_forwarding::{self, HeaderState};
use crate::util::object_model::{self, MarkWord, Shape};
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};

pub use self::copy_allocator::{AllocationPath, CopyAllocator, Generation};
pub use self::preserved_marks::PreservedMarks;
pub use self::stats::{PromotionFailedInfo, PromotionStats};

/// Tunables a promotion manager reads for a cycle.
#[derive(Copy, Clone, Debug)]
pub struct PromotionConfig {
    pub young_lab_size: usize,
    pub old_lab_size: usize,
    pub tenuring_threshold: usize,
    pub array_chunk_size: usize,
    pub min_array_size_for_chunking: usize,
    pub task_queue_capacity: usize,
    pub drain_target_stack_size: usize,
}

impl From<&Options> for PromotionConfig {
    fn from(options: &Options) -> Self {
        PromotionConfig {
            young_lab_size: options.young_lab_size,
            old_lab_size: options.old_lab_size,
            tenuring_threshold: options.tenuring_threshold,
            array_chunk_size: options.array_chunk_size,
            min_array_size_for_chunking: options.min_array_size_for_chunking,
            task_queue_capacity: options.task_queue_capacity,
            drain_target_stack_size: options.drain_target_stack_size,
        }
    }
}

/// The thread local state of one GC worker for copying: allocation buffers for both
/// generations, the worker's task queue, promotion failure records and statistics.
pub struct PromotionManager<'h> {
    ordinal: usize,
    heap: &'h GenerationalHeap,
    config: PromotionConfig,
    young: CopyAllocator<'h>,
    old: CopyAllocator<'h>,
    queue: OverflowTaskQueue,
    preserved_marks: PreservedMarks,
    promotion_failed_info: PromotionFailedInfo,
    stats: PromotionStats,
}

impl<'h> PromotionManager<'h> {
    pub fn new(ordinal: usize, heap: &'h GenerationalHeap, config: PromotionConfig) -> Self {
        PromotionManager {
            ordinal,
            heap,
            config,
            young: CopyAllocator::new(Generation::Young, heap.to_space(), config.young_lab_size),
            old: CopyAllocator::new(Generation::Old, heap.old(), config.old_lab_size),
            queue: OverflowTaskQueue::new(config.task_queue_capacity),
            preserved_marks: PreservedMarks::default(),
            promotion_failed_info: PromotionFailedInfo::new(ordinal),
            stats: PromotionStats::default(),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn queue(&self) -> &OverflowTaskQueue {
        &self.queue
    }

    /// Prepare for a cycle. The survivor spaces may have been flipped since the last one, so
    /// the young allocator is rebound to the current to-space.
    pub fn reset(&mut self, config: PromotionConfig) {
        assert!(
            self.queue.is_empty(),
            "Worker {}: task queue not empty at cycle start",
            self.ordinal
        );
        assert!(
            self.preserved_marks.is_empty(),
            "Worker {}: {} preserved marks not restored",
            self.ordinal,
            self.preserved_marks.len()
        );
        self.young.flush();
        self.old.flush();
        self.config = config;
        self.young =
            CopyAllocator::new(Generation::Young, self.heap.to_space(), config.young_lab_size);
        self.old.reset(config.old_lab_size);
        self.queue.reset_stats();
        self.promotion_failed_info.reset();
        self.stats = PromotionStats::default();
    }

    pub fn set_tenuring_threshold(&mut self, age: usize) {
        self.config.tenuring_threshold = age;
    }

    /// Queue the contents of `slot` for evacuation if it refers into the collection set.
    pub fn claim_or_forward_depth(&mut self, slot: Address) {
        let object = object_model::load_slot(slot);
        if !object.is_null() && self.heap.is_in_collection_set(object) {
            self.queue.push(ScanTask::Slot(slot));
        }
    }

    fn push_contents(&mut self, object: ObjectReference) {
        object_model::for_each_ref_slot(object, |slot| self.claim_or_forward_depth(slot));
    }

    fn push_array_chunk(&mut self, array: ObjectReference, start: usize, end: usize) {
        self.stats.masked_pushes += 1;
        self.queue.push(ScanTask::ArrayChunk { array, start, end });
    }

    /// Copy `object` out of the collection set unless another worker already did, and
    /// return its new location.
    ///
    /// The copy goes to the young generation while the object is younger than the tenuring
    /// threshold and the young generation has room, otherwise to the old generation. If
    /// neither has room the object is claimed in place.
    pub fn copy_to_survivor_space(&mut self, object: ObjectReference) -> ObjectReference {
        let mark = match object_forwarding::header_state(object) {
            HeaderState::Forwarded(to) => return to,
            HeaderState::Unforwarded(mark) => mark,
        };
        debug_assert!(self.heap.is_in_collection_set(object));

        let size = object_model::object_size(object);
        let mut destination = None;
        if mark.age() < self.config.tenuring_threshold {
            destination = self.young.alloc(size).map(|addr| (addr, Generation::Young));
        }
        if destination.is_none() {
            destination = self.old.alloc(size).map(|addr| (addr, Generation::Old));
        }
        let Some((addr, generation)) = destination else {
            self.old.mark_full();
            return self.oop_promotion_failed(object, mark, size);
        };

        object_model::copy_object_words(object, addr, size);
        let new_object = ObjectReference::from_raw_address(addr);
        let new_mark = match generation {
            Generation::Young => mark.incr_age(),
            Generation::Old => mark,
        };
        object_model::write_mark(new_object, new_mark);

        match object_forwarding::forward_to_atomic(object, mark, new_object) {
            Ok(()) => {
                self.stats.objects_copied += 1;
                self.stats.bytes_copied += size;
                if generation == Generation::Old {
                    self.stats.objects_promoted += 1;
                    self.stats.bytes_promoted += size;
                }
                trace!("Copied {} -> {} ({:?}, {} bytes)", object, new_object, generation, size);
                match object_model::shape(new_object) {
                    Shape::ObjArray { length }
                        if (size >> crate::util::constants::LOG_BYTES_IN_WORD)
                            > self.config.min_array_size_for_chunking =>
                    {
                        self.stats.arrays_chunked += 1;
                        self.push_array_chunk(new_object, 0, length);
                    }
                    _ => self.push_contents(new_object),
                }
                new_object
            }
            Err(winner) => {
                self.stats.cas_races_lost += 1;
                match generation {
                    Generation::Young => self.young.undo(addr, size),
                    Generation::Old => self.old.undo(addr, size),
                };
                winner
            }
        }
    }

    /// Neither generation could take the object: forward it to itself so exactly one worker
    /// scans it, and keep its mark word for restoration after the cycle.
    fn oop_promotion_failed(
        &mut self,
        object: ObjectReference,
        mark: MarkWord,
        size: usize,
    ) -> ObjectReference {
        match object_forwarding::forward_to_self(object, mark) {
            Ok(()) => {
                self.preserved_marks.push(object, mark);
                self.promotion_failed_info.register_copy_failure(size);
                trace!("Promotion failed for {} ({} bytes)", object, size);
                self.push_contents(object);
                object
            }
            Err(winner) => winner,
        }
    }

    fn process_array_chunk(&mut self, array: ObjectReference, start: usize, end: usize) {
        let (scan, rest) = next_chunk(start, end, self.config.array_chunk_size);
        if let Some((rest_start, rest_end)) = rest {
            self.push_array_chunk(array, rest_start, rest_end);
        }
        for index in scan {
            self.claim_or_forward_depth(object_model::ref_slot(array, index));
        }
        self.stats.array_chunks_processed += 1;
    }

    fn process_task(&mut self, task: ScanTask) {
        match task {
            ScanTask::Slot(slot) => {
                let object = object_model::load_slot(slot);
                let new_object = self.copy_to_survivor_space(object);
                object_model::store_slot(slot, new_object);
            }
            ScanTask::ArrayChunk { array, start, end } => self.process_array_chunk(array, start, end),
        }
    }

    /// Process queued tasks. The overflow stack goes first, moving tasks to the stealable
    /// queue when it has room. Then the stealable queue is drained to empty if `totally`,
    /// otherwise down to the target size so other workers can steal the rest.
    pub fn drain_stacks(&mut self, totally: bool) {
        let threshold = if totally {
            0
        } else {
            self.config.drain_target_stack_size
        };
        loop {
            while let Some(task) = self.queue.pop_overflow() {
                if !self.queue.try_push_to_taskqueue(task) {
                    self.process_task(task);
                }
            }
            while self.queue.size() > threshold {
                match self.queue.pop_local() {
                    Some(task) => self.process_task(task),
                    None => break,
                }
            }
            if self.queue.overflow_empty() {
                break;
            }
        }
        debug_assert!(!totally || self.queue.is_empty());
    }

    /// Evacuate whatever the given slots refer to, transitively, on this worker alone.
    pub fn evacuate_slots(&mut self, slots: &[Address]) {
        for &slot in slots {
            self.claim_or_forward_depth(slot);
            self.drain_stacks(false);
        }
        self.drain_stacks(true);
    }

    /// The body of a parallel worker: take root tasks, then steal until every worker agrees
    /// there is nothing left.
    pub fn steal_work(&mut self, queues: &TaskQueueSet, terminator: &Terminator) {
        while let Some(task) = queues.pop_injected() {
            self.process_task(task);
            self.drain_stacks(false);
        }
        self.drain_stacks(true);

        let mut seed = self.ordinal + 1;
        loop {
            while let Some(task) = queues
                .pop_injected()
                .or_else(|| queues.steal(self.ordinal, seed, &mut self.queue))
            {
                if task.is_array_chunk() {
                    self.stats.masked_steals += 1;
                }
                self.process_task(task);
                self.drain_stacks(true);
            }
            if terminator.offer_termination(|| queues.has_work()) {
                break;
            }
            seed = seed.wrapping_add(1);
        }
        debug_assert!(self.queue.is_empty());
    }

    /// Plug both allocation buffers so the spaces are parseable.
    pub fn flush(&mut self) {
        self.young.flush();
        self.old.flush();
    }

    /// Put back the marks of objects claimed in place. Returns how many were restored.
    pub fn restore_preserved_marks(&mut self) -> usize {
        self.preserved_marks.restore_all()
    }

    pub fn promotion_failed_info(&self) -> &PromotionFailedInfo {
        &self.promotion_failed_info
    }

    pub fn young_gen_is_full(&self) -> bool {
        self.young.is_full()
    }

    pub fn old_gen_is_full(&self) -> bool {
        self.old.is_full()
    }

    /// A snapshot of this cycle's counters.
    pub fn stats(&self) -> PromotionStats {
        let mut stats = self.stats.clone();
        for allocator in [&self.young, &self.old] {
            stats.allocations[allocator.generation()] = allocator.allocations().clone();
            stats.unallocated += allocator.unallocated();
            stats.fillers += allocator.fillers();
            stats.lab_waste += allocator.waste();
        }
        stats.queue = *self.queue.stats();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::object_forwarding::is_self_forwarded;
    use crate::util::test_util::fixtures::{alloc_node, node_id, set_edge};
    use crate::util::test_util::serial_test;

    const MB: usize = 1 << 20;

    fn heap(max: usize) -> (GenerationalHeap, PromotionConfig) {
        let mut options = Options::builtin();
        options.max_heap_size = max;
        options.min_heap_size = max;
        options.young_lab_size = 4096;
        options.old_lab_size = 4096;
        let heap = GenerationalHeap::new(&options).unwrap();
        (heap, PromotionConfig::from(&options))
    }

    #[test]
    fn copy_and_forward() {
        serial_test(|| {
            let (heap, config) = heap(8 * MB);
            let mut pm = PromotionManager::new(0, &heap, config);
            let a = alloc_node(&heap, 1);
            let b = alloc_node(&heap, 2);
            set_edge(a, 0, b);

            let a2 = pm.copy_to_survivor_space(a);
            assert!(heap.to_space().contains_object(a2));
            assert_eq!(pm.copy_to_survivor_space(a), a2);
            assert_eq!(object_model::read_mark(a2).age(), 1);
            pm.drain_stacks(true);

            let b2 = object_model::load_slot(object_model::ref_slot(a2, 0));
            assert!(heap.to_space().contains_object(b2));
            assert_eq!(node_id(b2), 2);
            assert_eq!(pm.stats().objects_copied, 2);
            pm.flush();
            heap.verify_parseable();
        });
    }

    #[test]
    fn old_enough_objects_are_promoted() {
        serial_test(|| {
            let (heap, config) = heap(8 * MB);
            let mut pm = PromotionManager::new(0, &heap, config);
            let a = alloc_node(&heap, 1);
            object_model::write_mark(a, MarkWord::prototype().with_age(config.tenuring_threshold));
            let a2 = pm.copy_to_survivor_space(a);
            assert!(heap.old().contains_object(a2));
            // Promoted copies keep their age.
            assert_eq!(object_model::read_mark(a2).age(), config.tenuring_threshold);
            assert_eq!(pm.stats().objects_promoted, 1);
            pm.flush();
        });
    }

    #[test]
    fn full_young_gen_overflows_to_old() {
        serial_test(|| {
            let (heap, config) = heap(8 * MB);
            let mut pm = PromotionManager::new(0, &heap, config);
            heap.to_space().set_capacity(4096);
            let nodes: Vec<_> = (0..200).map(|i| alloc_node(&heap, i)).collect();
            for &n in &nodes {
                pm.copy_to_survivor_space(n);
            }
            assert!(pm.young_gen_is_full());
            let stats = pm.stats();
            assert!(stats.objects_promoted > 0);
            assert!(stats.objects_promoted < 200);
            pm.flush();
        });
    }

    #[test]
    fn promotion_failure_claims_in_place() {
        serial_test(|| {
            let (heap, config) = heap(8 * MB);
            let mut pm = PromotionManager::new(0, &heap, config);
            heap.to_space().set_capacity(0);
            heap.old().set_capacity(0);
            let a = alloc_node(&heap, 1);
            let mark = MarkWord::prototype().with_hash(99);
            object_model::write_mark(a, mark);

            assert_eq!(pm.copy_to_survivor_space(a), a);
            assert!(is_self_forwarded(a));
            assert!(pm.old_gen_is_full());
            assert_eq!(pm.promotion_failed_info().count, 1);
            // Claimed objects are not claimed twice.
            assert_eq!(pm.copy_to_survivor_space(a), a);
            assert_eq!(pm.promotion_failed_info().count, 1);

            assert_eq!(pm.restore_preserved_marks(), 1);
            assert_eq!(object_model::read_mark(a), mark);
            pm.flush();
        });
    }

    #[test]
    fn large_array_is_chunked() {
        serial_test(|| {
            let (heap, config) = heap(8 * MB);
            let mut pm = PromotionManager::new(0, &heap, config);
            let length = 1000;
            let array = heap.alloc_array(length).unwrap();
            for i in 0..length {
                object_model::store_slot(object_model::ref_slot(array, i), alloc_node(&heap, i));
            }
            let new_array = pm.copy_to_survivor_space(array);
            pm.drain_stacks(true);

            let stats = pm.stats();
            assert_eq!(stats.arrays_chunked, 1);
            assert_eq!(stats.array_chunks_processed, length.div_ceil(config.array_chunk_size));
            for i in 0..length {
                let element = object_model::load_slot(object_model::ref_slot(new_array, i));
                assert!(heap.to_space().contains_object(element));
                assert_eq!(node_id(element), i);
            }
            pm.flush();
        });
    }

    #[test]
    fn drain_to_target_leaves_work_for_thieves() {
        serial_test(|| {
            let (heap, mut config) = heap(8 * MB);
            config.drain_target_stack_size = 8;
            config.task_queue_capacity = 16;
            let mut pm = PromotionManager::new(0, &heap, config);
            let mut roots: Vec<ObjectReference> = (0..64).map(|i| alloc_node(&heap, i)).collect();
            for root in roots.iter_mut() {
                pm.claim_or_forward_depth(Address::from_mut_ptr(root));
            }
            assert!(!pm.queue().overflow_empty());
            pm.drain_stacks(false);
            assert!(pm.queue().overflow_empty());
            assert!(pm.queue().size() <= 8);
            pm.drain_stacks(true);
            assert!(pm.queue().is_empty());
            assert!(roots.iter().all(|r| heap.to_space().contains_object(*r)));
            pm.flush();
        });
    }
}
