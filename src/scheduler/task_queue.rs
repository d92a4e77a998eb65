use crossbeam::deque::{Injector, Steal, Stealer, Worker};

use super::task::ScanTask;

/// Queue activity counters of one worker.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskQueueStats {
    pub pushes: usize,
    pub pops: usize,
    pub steal_attempts: usize,
    pub steals: usize,
    pub overflow_pushes: usize,
    pub overflow_max_len: usize,
}

impl TaskQueueStats {
    pub fn merge(&mut self, other: &TaskQueueStats) {
        self.pushes += other.pushes;
        self.pops += other.pops;
        self.steal_attempts += other.steal_attempts;
        self.steals += other.steals;
        self.overflow_pushes += other.overflow_pushes;
        self.overflow_max_len = self.overflow_max_len.max(other.overflow_max_len);
    }
}

/// A worker's own task queue. The bounded part is a work-stealing deque other workers can
/// steal from; tasks that do not fit go to a private overflow stack.
pub struct OverflowTaskQueue {
    queue: Worker<ScanTask>,
    overflow: Vec<ScanTask>,
    capacity: usize,
    stats: TaskQueueStats,
}

impl OverflowTaskQueue {
    pub fn new(capacity: usize) -> Self {
        OverflowTaskQueue {
            queue: Worker::new_lifo(),
            overflow: Vec::new(),
            capacity,
            stats: TaskQueueStats::default(),
        }
    }

    pub fn stealer(&self) -> Stealer<ScanTask> {
        self.queue.stealer()
    }

    pub fn push(&mut self, task: ScanTask) {
        self.stats.pushes += 1;
        if !self.try_push_to_taskqueue(task) {
            self.overflow.push(task);
            self.stats.overflow_pushes += 1;
            self.stats.overflow_max_len = self.stats.overflow_max_len.max(self.overflow.len());
            trace!("Task queue full, overflow stack at {}", self.overflow.len());
        }
    }

    /// Push to the stealable part if it has room.
    pub fn try_push_to_taskqueue(&mut self, task: ScanTask) -> bool {
        if self.queue.len() < self.capacity {
            self.queue.push(task);
            true
        } else {
            false
        }
    }

    pub fn pop_overflow(&mut self) -> Option<ScanTask> {
        self.overflow.pop()
    }

    pub fn pop_local(&mut self) -> Option<ScanTask> {
        let task = self.queue.pop();
        if task.is_some() {
            self.stats.pops += 1;
        }
        task
    }

    /// Tasks in the stealable part.
    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn taskqueue_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn overflow_empty(&self) -> bool {
        self.overflow.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.taskqueue_empty() && self.overflow_empty()
    }

    /// Take tasks from `source` into this queue and pop one of them.
    pub fn steal_from(&mut self, source: &Stealer<ScanTask>) -> Option<ScanTask> {
        self.stats.steal_attempts += 1;
        loop {
            match source.steal_batch_and_pop(&self.queue) {
                Steal::Success(task) => {
                    self.stats.steals += 1;
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    pub fn stats(&self) -> &TaskQueueStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = TaskQueueStats::default();
    }
}

/// The shared view of every worker queue, plus an injector for root tasks.
pub struct TaskQueueSet {
    stealers: Vec<Stealer<ScanTask>>,
    injector: Injector<ScanTask>,
}

impl TaskQueueSet {
    pub fn new(stealers: Vec<Stealer<ScanTask>>) -> Self {
        TaskQueueSet {
            stealers,
            injector: Injector::new(),
        }
    }

    pub fn inject(&self, task: ScanTask) {
        self.injector.push(task);
    }

    /// Take one injected task.
    pub fn pop_injected(&self) -> Option<ScanTask> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Try every other worker's queue once, starting at a victim that rotates with `seed`.
    pub fn steal(&self, thief: usize, seed: usize, queue: &mut OverflowTaskQueue) -> Option<ScanTask> {
        let n = self.stealers.len();
        if n <= 1 {
            return None;
        }
        for i in 0..n {
            let victim = (seed + i) % n;
            if victim == thief {
                continue;
            }
            if let Some(task) = queue.steal_from(&self.stealers[victim]) {
                return Some(task);
            }
        }
        None
    }

    /// Whether any stealable or injected work is visible.
    pub fn has_work(&self) -> bool {
        !self.injector.is_empty() || self.stealers.iter().any(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.stealers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stealers.is_empty()
    }
}
