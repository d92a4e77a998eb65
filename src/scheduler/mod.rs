//! Parallel scan work: task representation, per-worker queues with stealing, and termination.

pub mod task;
pub mod task_queue;
pub mod terminator;
pub mod worker;

pub use task::ScanTask;
pub use task_queue::{OverflowTaskQueue, TaskQueueSet, TaskQueueStats};
pub use terminator::Terminator;
pub use worker::WorkerGroup;
