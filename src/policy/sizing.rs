use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions::{percent_of, raw_align_up};

/// Free-ratio driven resizing of one generation between cycles.
#[derive(Copy, Clone, Debug)]
pub struct GenerationSizer {
    /// Growth step as a percentage of the current capacity.
    pub increment: usize,
    /// Shrinking steps are `increment / decrement_scale_factor` percent.
    pub decrement_scale_factor: usize,
    pub min_free_ratio: usize,
    pub max_free_ratio: usize,
}

impl GenerationSizer {
    /// The capacity the generation should have, given its current `capacity` and the bytes
    /// that count as `used`. The result is page aligned, at least `used`, and within
    /// `[min_capacity, max_capacity]`.
    pub fn compute_new_capacity(
        &self,
        capacity: usize,
        used: usize,
        min_capacity: usize,
        max_capacity: usize,
    ) -> usize {
        debug_assert!(min_capacity <= max_capacity);
        let capacity = capacity.max(1);
        let free = capacity.saturating_sub(used);
        let free_percent = free * 100 / capacity;

        let desired = if free_percent < self.min_free_ratio {
            // Capacity at which `used` leaves exactly min_free_ratio free.
            let target = Self::capacity_for_free_ratio(used, self.min_free_ratio);
            let step = percent_of(capacity, self.increment);
            capacity + target.saturating_sub(capacity).max(step)
        } else if free_percent > self.max_free_ratio {
            let target = Self::capacity_for_free_ratio(used, self.max_free_ratio);
            let max_step = percent_of(capacity, self.increment / self.decrement_scale_factor.max(1));
            capacity - capacity.saturating_sub(target).min(max_step)
        } else {
            capacity
        };

        let new_capacity = raw_align_up(desired.max(used), BYTES_IN_PAGE)
            .clamp(min_capacity, max_capacity)
            .max(used);
        if new_capacity != capacity {
            trace!(
                "Resize: capacity {} used {} ({}% free) -> {}",
                capacity,
                used,
                free_percent,
                new_capacity
            );
        }
        new_capacity
    }

    fn capacity_for_free_ratio(used: usize, free_ratio: usize) -> usize {
        if free_ratio >= 100 {
            return usize::MAX;
        }
        used / (100 - free_ratio) * 100 + (used % (100 - free_ratio)) * 100 / (100 - free_ratio)
    }
}
