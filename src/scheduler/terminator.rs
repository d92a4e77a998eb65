use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

/// Decides when every worker is out of work. A worker that finds nothing to steal offers
/// termination; the offer is withdrawn as soon as any work shows up again.
pub struct Terminator {
    nworkers: usize,
    offered: AtomicUsize,
}

impl Terminator {
    pub fn new(nworkers: usize) -> Self {
        assert!(nworkers > 0);
        Terminator {
            nworkers,
            offered: AtomicUsize::new(0),
        }
    }

    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    /// Block until either all workers have offered termination, in which case this returns
    /// `true`, or `has_work` reports work, in which case the offer is withdrawn and this
    /// returns `false`.
    ///
    /// A worker only offers once its own queues are empty, and work only becomes visible
    /// through a queue, so once all workers have offered no new work can appear.
    pub fn offer_termination(&self, has_work: impl Fn() -> bool) -> bool {
        let offered = self.offered.fetch_add(1, Ordering::SeqCst) + 1;
        if offered == self.nworkers {
            return true;
        }

        let backoff = Backoff::new();
        loop {
            if self.offered.load(Ordering::SeqCst) == self.nworkers {
                return true;
            }
            if has_work() {
                // Withdraw, unless the last worker offered in the meantime.
                let mut current = self.offered.load(Ordering::SeqCst);
                loop {
                    if current == self.nworkers {
                        return true;
                    }
                    match self.offered.compare_exchange(
                        current,
                        current - 1,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    ) {
                        Ok(_) => return false,
                        Err(actual) => current = actual,
                    }
                }
            }
            if backoff.is_completed() {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Prepare for the next round. Must not be called while workers may still offer.
    pub fn reset(&self) {
        self.offered.store(0, Ordering::SeqCst);
    }

    pub fn offered(&self) -> usize {
        self.offered.load(Ordering::SeqCst)
    }
}
