//! A scavenge cycle: the collection context owns every promotion manager and the shared work
//! distribution state, and exposes the cycle entry points.

use crate::heap::GenerationalHeap;
use crate::scheduler::{ScanTask, TaskQueueSet, Terminator, WorkerGroup};
use crate::util::copy::{PromotionConfig, PromotionFailedInfo, PromotionManager, PromotionStats};
use crate::util::options::Options;
use crate::util::{Address, ObjectReference};

/// The result of a cycle.
#[derive(Debug)]
pub struct ScavengeOutcome {
    /// Whether any object could not be copied and was left in place.
    pub promotion_failed: bool,
    /// Failure records of the workers that failed, in worker order.
    pub failures: Vec<PromotionFailedInfo>,
    /// Totals over all workers.
    pub stats: PromotionStats,
    /// Counters of each manager, parallel workers first and the VM thread last.
    pub worker_stats: Vec<PromotionStats>,
}

/// Per-cycle collection state: one promotion manager per worker plus one for the VM thread,
/// the shared queues and the terminator.
pub struct CollectionContext<'h> {
    heap: &'h GenerationalHeap,
    config: PromotionConfig,
    managers: Vec<PromotionManager<'h>>,
    queues: TaskQueueSet,
    terminator: Terminator,
    workers: WorkerGroup,
    in_cycle: bool,
}

impl<'h> CollectionContext<'h> {
    pub fn new(heap: &'h GenerationalHeap, options: &Options) -> Self {
        let config = PromotionConfig::from(options);
        let nworkers = options.threads;
        let managers: Vec<PromotionManager<'h>> = (0..=nworkers)
            .map(|ordinal| PromotionManager::new(ordinal, heap, config))
            .collect();
        let queues = TaskQueueSet::new(managers.iter().map(|m| m.queue().stealer()).collect());
        info!("Collection context with {} workers", nworkers);
        CollectionContext {
            heap,
            config,
            managers,
            queues,
            terminator: Terminator::new(nworkers),
            workers: WorkerGroup::new(nworkers),
            in_cycle: false,
        }
    }

    pub fn heap(&self) -> &'h GenerationalHeap {
        self.heap
    }

    pub fn nworkers(&self) -> usize {
        self.workers.nworkers()
    }

    fn vm_thread_ordinal(&self) -> usize {
        self.managers.len() - 1
    }

    /// The tenuring threshold for the following cycles: objects at least this old are
    /// promoted.
    pub fn set_tenuring_threshold(&mut self, age: usize) {
        self.config.tenuring_threshold = age;
        for manager in self.managers.iter_mut() {
            manager.set_tenuring_threshold(age);
        }
    }

    pub fn tenuring_threshold(&self) -> usize {
        self.config.tenuring_threshold
    }

    /// Reset every promotion manager for a new cycle.
    pub fn begin_cycle(&mut self) {
        assert!(!self.in_cycle, "begin_cycle called twice");
        assert!(!self.queues.has_work(), "Task queues not empty at cycle start");
        for manager in self.managers.iter_mut() {
            manager.reset(self.config);
        }
        self.terminator.reset();
        self.in_cycle = true;
        debug!(
            "Begin cycle: eden {} bytes, from-space {} bytes",
            self.heap.eden().used(),
            self.heap.from_space().used()
        );
    }

    /// Evacuate everything reachable from `roots` with all workers, updating the roots in
    /// place. Blocks until the workers terminate.
    pub fn scavenge(&mut self, roots: &mut [ObjectReference]) {
        assert!(self.in_cycle, "scavenge outside a cycle");
        let mut injected = 0;
        for root in roots.iter_mut() {
            if !root.is_null() && self.heap.is_in_collection_set(*root) {
                self.queues.inject(ScanTask::Slot(Address::from_mut_ptr(root)));
                injected += 1;
            }
        }
        debug!("Scavenging from {} of {} roots", injected, roots.len());

        let nworkers = self.workers.nworkers();
        let queues = &self.queues;
        let terminator = &self.terminator;
        let managers: Vec<&mut PromotionManager<'h>> =
            self.managers.iter_mut().take(nworkers).collect();
        self.workers.run(managers, |_, manager| {
            manager.steal_work(queues, terminator);
        });
        self.terminator.reset();
    }

    /// Drain a worker's stacks, totally or down to the target size.
    pub fn drain_stacks(&mut self, worker: usize, totally: bool) {
        self.managers[worker].drain_stacks(totally);
    }

    /// Evacuate from extra slots on the VM thread after the parallel phase.
    pub fn evacuate_serial(&mut self, slots: &[Address]) {
        assert!(self.in_cycle, "evacuate_serial outside a cycle");
        let vm = self.vm_thread_ordinal();
        self.managers[vm].evacuate_slots(slots);
    }

    /// Finish the cycle: flush buffers, gather statistics, and on success empty and resize
    /// the young generation. After a promotion failure the heap is left as is and
    /// [`CollectionContext::restore_preserved_marks`] must run before the next cycle.
    pub fn end_cycle(&mut self) -> ScavengeOutcome {
        assert!(self.in_cycle, "end_cycle outside a cycle");
        assert!(
            !self.queues.has_work() && self.managers.iter().all(|m| m.queue().is_empty()),
            "Task queues not empty at cycle end"
        );
        self.in_cycle = false;

        let mut stats = PromotionStats::default();
        let mut worker_stats = Vec::with_capacity(self.managers.len());
        let mut failures = vec![];
        for manager in self.managers.iter_mut() {
            manager.flush();
            let s = manager.stats();
            s.log(manager.ordinal());
            stats.merge(&s);
            worker_stats.push(s);
            let info = manager.promotion_failed_info();
            if info.has_failed() {
                info!(
                    "Promotion failed on worker {}: {} objects, {} bytes (first {} bytes, smallest {} bytes)",
                    info.worker, info.count, info.total_size, info.first_size, info.smallest_size
                );
                failures.push(*info);
            }
        }
        let promotion_failed = !failures.is_empty();

        debug!(
            "End cycle: copied {} objects ({} bytes), promoted {} ({} bytes), {} races lost",
            stats.objects_copied,
            stats.bytes_copied,
            stats.objects_promoted,
            stats.bytes_promoted,
            stats.cas_races_lost
        );
        if !promotion_failed {
            self.heap.complete_scavenge();
        }

        ScavengeOutcome {
            promotion_failed,
            failures,
            stats,
            worker_stats,
        }
    }

    /// Give every object claimed in place after a promotion failure its mark word back.
    /// Returns the number of objects restored. The young generation is not reset; the caller
    /// follows up with a full collection.
    pub fn restore_preserved_marks(&mut self) -> usize {
        assert!(!self.in_cycle, "restore_preserved_marks during a cycle");
        let restored: usize = self
            .managers
            .iter_mut()
            .map(|m| m.restore_preserved_marks())
            .sum();
        if restored > 0 {
            info!("Restored {} preserved marks", restored);
        }
        restored
    }
}
