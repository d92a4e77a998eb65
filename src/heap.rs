//! The generational heap the promotion engine collects: eden, two survivor spaces and an old
//! space carved from one anonymous mapping.

use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::policy::{ContiguousSpace, GenerationSizer};
use crate::util::constants::BYTES_IN_PAGE;
use crate::util::conversions::{raw_align_down, raw_align_up};
use crate::util::memory::MmapRegion;
use crate::util::object_model::{self, Shape};
use crate::util::options::Options;
use crate::util::ObjectReference;

/// Bounds within which the sizer may move a space's capacity.
#[derive(Copy, Clone, Debug)]
struct CapacityBounds {
    min: usize,
    max: usize,
}

pub struct GenerationalHeap {
    eden: ContiguousSpace,
    survivors: [ContiguousSpace; 2],
    /// Index of the survivor space currently holding survivors of the previous cycle.
    from_index: AtomicUsize,
    old: ContiguousSpace,
    eden_bounds: CapacityBounds,
    old_bounds: CapacityBounds,
    eden_sizer: GenerationSizer,
    old_sizer: GenerationSizer,
    region: MmapRegion,
}

fn scale(value: usize, numerator: usize, denominator: usize) -> usize {
    ((value as u128 * numerator as u128) / denominator as u128) as usize
}

impl GenerationalHeap {
    /// Map the heap and lay out its spaces according to `max_heap_size`, `new_ratio` and
    /// `survivor_ratio`. Spaces start at the capacity implied by `min_heap_size`.
    pub fn new(options: &Options) -> Result<Self> {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("Scavenger initialized the logger."),
            Err(_) => debug!(
                "Scavenger failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        let max = raw_align_up(options.max_heap_size, BYTES_IN_PAGE);
        let min = raw_align_up(options.effective_min_heap_size(), BYTES_IN_PAGE);

        let young = raw_align_down(max / (options.new_ratio + 1), BYTES_IN_PAGE);
        let survivor = raw_align_down(young / (options.survivor_ratio + 2), BYTES_IN_PAGE)
            .max(BYTES_IN_PAGE);
        if young <= 2 * survivor || max <= young {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Heap of {} bytes is too small for new_ratio {} and survivor_ratio {}",
                    max, options.new_ratio, options.survivor_ratio
                ),
            ));
        }
        let eden_max = young - 2 * survivor;
        let old_max = max - young;
        let eden_min = raw_align_up(scale(eden_max, min, max), BYTES_IN_PAGE).max(BYTES_IN_PAGE);
        let old_min = raw_align_up(scale(old_max, min, max), BYTES_IN_PAGE).max(BYTES_IN_PAGE);

        let region = MmapRegion::new(max)?;
        let eden_start = region.start();
        let s0_start = eden_start + eden_max;
        let s1_start = s0_start + survivor;
        let old_start = s1_start + survivor;

        info!(
            "Heap {}..{}: eden {} KB, survivors 2 x {} KB, old {} KB",
            region.start(),
            region.end(),
            eden_max >> 10,
            survivor >> 10,
            old_max >> 10
        );

        Ok(GenerationalHeap {
            eden: ContiguousSpace::new("eden", eden_start..s0_start, eden_min),
            survivors: [
                ContiguousSpace::new("survivor0", s0_start..s1_start, survivor),
                ContiguousSpace::new("survivor1", s1_start..old_start, survivor),
            ],
            from_index: AtomicUsize::new(0),
            old: ContiguousSpace::new("old", old_start..region.end(), old_min),
            eden_bounds: CapacityBounds {
                min: eden_min,
                max: eden_max,
            },
            old_bounds: CapacityBounds {
                min: old_min,
                max: old_max,
            },
            eden_sizer: GenerationSizer {
                increment: options.young_generation_size_increment,
                decrement_scale_factor: options.size_decrement_scale_factor,
                min_free_ratio: options.min_heap_free_ratio,
                max_free_ratio: options.max_heap_free_ratio,
            },
            old_sizer: GenerationSizer {
                increment: options.tenured_generation_size_increment,
                decrement_scale_factor: options.size_decrement_scale_factor,
                min_free_ratio: options.min_heap_free_ratio,
                max_free_ratio: options.max_heap_free_ratio,
            },
            region,
        })
    }

    pub fn eden(&self) -> &ContiguousSpace {
        &self.eden
    }

    pub fn old(&self) -> &ContiguousSpace {
        &self.old
    }

    /// The survivor space collected in the next cycle.
    pub fn from_space(&self) -> &ContiguousSpace {
        &self.survivors[self.from_index.load(Ordering::Relaxed)]
    }

    /// The survivor space the next cycle copies into.
    pub fn to_space(&self) -> &ContiguousSpace {
        &self.survivors[1 - self.from_index.load(Ordering::Relaxed)]
    }

    /// Whether objects at this address are evacuated by a scavenge: eden and the from-space.
    pub fn is_in_collection_set(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        self.eden.contains(addr) || self.from_space().contains(addr)
    }

    pub fn is_in_young(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        self.eden.contains(addr) || self.survivors.iter().any(|s| s.contains(addr))
    }

    pub fn is_in_heap(&self, object: ObjectReference) -> bool {
        let addr = object.to_raw_address();
        addr >= self.region.start() && addr < self.region.end()
    }

    /// Allocate a new instance in eden. Returns `None` if eden is full.
    pub fn alloc_instance(&self, refs: usize, data_words: usize) -> Option<ObjectReference> {
        let size = Shape::Instance { refs, data_words }.size_in_bytes();
        let start = self.eden.par_alloc(size)?;
        Some(object_model::initialize_instance(start, refs, data_words))
    }

    /// Allocate a new object array in eden. Returns `None` if eden is full.
    pub fn alloc_array(&self, length: usize) -> Option<ObjectReference> {
        let size = Shape::ObjArray { length }.size_in_bytes();
        let start = self.eden.par_alloc(size)?;
        Some(object_model::initialize_array(start, length))
    }

    /// Empty the collection set after a successful scavenge, swap the survivor spaces and
    /// resize eden and the old space.
    pub fn complete_scavenge(&self) {
        let eden_used = self.eden.used();
        self.eden.reset();
        self.from_space().reset();
        self.from_index.fetch_xor(1, Ordering::Relaxed);

        let eden_capacity = self.eden_sizer.compute_new_capacity(
            self.eden.capacity(),
            eden_used,
            self.eden_bounds.min,
            self.eden_bounds.max,
        );
        self.eden.set_capacity(eden_capacity);

        let old_capacity = self.old_sizer.compute_new_capacity(
            self.old.capacity(),
            self.old.used(),
            self.old_bounds.min,
            self.old_bounds.max,
        );
        self.old.set_capacity(old_capacity);

        debug!(
            "After scavenge: eden capacity {} KB, survivors {} KB, old {} of {} KB",
            eden_capacity >> 10,
            self.from_space().used() >> 10,
            self.old.used() >> 10,
            old_capacity >> 10
        );
    }

    pub fn used(&self) -> usize {
        self.eden.used() + self.survivors[0].used() + self.survivors[1].used() + self.old.used()
    }

    pub fn capacity(&self) -> usize {
        self.eden.capacity() + self.survivors[0].capacity() + self.survivors[1].capacity()
            + self.old.capacity()
    }

    /// Walk every space, checking that it is parseable.
    pub fn verify_parseable(&self) {
        for space in [&self.eden, &self.survivors[0], &self.survivors[1], &self.old] {
            space.object_iterate(|_| {});
        }
    }
}
