use std::thread;

/// Runs one closure per worker on named, scoped threads and collects the results in
/// worker order.
pub struct WorkerGroup {
    nworkers: usize,
}

impl WorkerGroup {
    pub fn new(nworkers: usize) -> Self {
        assert!(nworkers > 0);
        WorkerGroup { nworkers }
    }

    pub fn nworkers(&self) -> usize {
        self.nworkers
    }

    /// Run `work(ordinal, state)` for each state on its own thread. Panics in a worker are
    /// propagated to the caller.
    pub fn run<S, R, F>(&self, states: Vec<S>, work: F) -> Vec<R>
    where
        S: Send,
        R: Send,
        F: Fn(usize, S) -> R + Sync,
    {
        assert_eq!(states.len(), self.nworkers);
        let work = &work;
        thread::scope(|scope| {
            let handles: Vec<_> = states
                .into_iter()
                .enumerate()
                .map(|(ordinal, state)| {
                    thread::Builder::new()
                        .name(format!("scavenger-worker-{}", ordinal))
                        .spawn_scoped(scope, move || work(ordinal, state))
                        .unwrap_or_else(|e| panic!("Failed to spawn worker {}: {}", ordinal, e))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(e) => std::panic::resume_unwind(e),
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_in_worker_order() {
        let group = WorkerGroup::new(3);
        let out = group.run(vec![10, 20, 30], |i, s| {
            assert_eq!(
                thread::current().name(),
                Some(format!("scavenger-worker-{}", i).as_str())
            );
            s + i
        });
        assert_eq!(out, vec![10, 21, 32]);
    }
}
