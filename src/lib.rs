//! Scavenger is the memory-region bookkeeping and copy-forward core of a generational
//! garbage collector.
//!
//! The crate has two halves:
//!
//! * The control plane ([`util::heap`]): a ledger of physical memory segments, a region
//!   allocator for the virtual address space, and a mapping manager that commits physical
//!   memory and maps it into one or more virtual views. These types are not internally
//!   synchronized; callers serialize access with the heap allocation lock (the
//!   [`util::heap::PageAllocator`] owns one).
//! * The data plane ([`scavenge`]): per-worker promotion managers that copy live objects out
//!   of the young generation in parallel, claiming each object with a single compare-and-swap
//!   on its header word, and balancing work through work-stealing queues until the workers
//!   agree on termination.
//!
//! A typical cycle looks like this:
//!
//! ```ignore
//! let options = Options::default();
//! let heap = GenerationalHeap::new(&options)?;
//! let mut context = CollectionContext::new(&heap, &options);
//! context.begin_cycle();
//! context.scavenge(&mut roots);
//! let outcome = context.end_cycle();
//! if outcome.promotion_failed {
//!     context.restore_preserved_marks();
//!     // A full collection is now required.
//! }
//! ```

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate lazy_static;

pub mod heap;
pub mod policy;
pub mod scavenge;
pub mod scheduler;
pub mod util;

pub use crate::heap::GenerationalHeap;
pub use crate::scavenge::{CollectionContext, ScavengeOutcome};
pub use crate::util::options::Options;
