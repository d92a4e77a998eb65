use enum_map::{Enum, EnumMap};

use crate::policy::ContiguousSpace;
use crate::util::alloc::LocalAllocBuffer;
use crate::util::object_model;
use crate::util::Address;

/// The generation a copy is allocated in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum Generation {
    Young,
    Old,
}

/// How a copy's memory was obtained.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum AllocationPath {
    /// Bumped from the worker's current buffer.
    Local,
    /// Taken from the shared space directly, bypassing the buffer.
    Direct,
    /// Bumped from a buffer that was refilled for this request.
    Refill,
}

enum Step {
    Local,
    Direct,
    FlushAndRefill,
}

/// Per-worker allocation of copies into one generation: a local buffer backed by a shared
/// space, with the local -> direct -> flush-and-refill policy.
pub struct CopyAllocator<'h> {
    generation: Generation,
    space: &'h ContiguousSpace,
    lab: LocalAllocBuffer,
    lab_size: usize,
    /// Set once the space could not provide a new buffer. Only the current buffer is used
    /// for the rest of the cycle.
    is_full: bool,
    allocations: EnumMap<AllocationPath, usize>,
    unallocated: usize,
    fillers: usize,
    waste: usize,
}

impl<'h> CopyAllocator<'h> {
    pub fn new(generation: Generation, space: &'h ContiguousSpace, lab_size: usize) -> Self {
        CopyAllocator {
            generation,
            space,
            lab: LocalAllocBuffer::new(),
            lab_size,
            is_full: false,
            allocations: EnumMap::default(),
            unallocated: 0,
            fillers: 0,
            waste: 0,
        }
    }

    /// Allocate `size` bytes for a copy. Returns `None` if neither the buffer nor the space
    /// can provide it.
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        let mut step = Step::Local;
        loop {
            step = match step {
                Step::Local => match self.lab.try_alloc(size) {
                    Some(addr) => return Some(self.record(AllocationPath::Local, addr)),
                    None if self.is_full => return None,
                    None if size > self.lab_size / 2 => Step::Direct,
                    None => Step::FlushAndRefill,
                },
                Step::Direct => {
                    let addr = self.space.par_alloc(size)?;
                    return Some(self.record(AllocationPath::Direct, addr));
                }
                Step::FlushAndRefill => {
                    self.retire_lab();
                    match self.space.par_alloc(self.lab_size) {
                        Some(start) => {
                            self.lab.reinitialize(start..start + self.lab_size);
                            let addr = self.lab.try_alloc(size)?;
                            return Some(self.record(AllocationPath::Refill, addr));
                        }
                        None => {
                            debug!(
                                "{:?} generation full: no {} byte buffer left in {}",
                                self.generation,
                                self.lab_size,
                                self.space.name()
                            );
                            self.is_full = true;
                            return None;
                        }
                    }
                }
            }
        }
    }

    fn record(&mut self, path: AllocationPath, addr: Address) -> Address {
        self.allocations[path] += 1;
        addr
    }

    /// Give back a copy that lost the forwarding race. Returns `true` if the memory was
    /// reclaimed, `false` if it was turned into a filler.
    pub fn undo(&mut self, addr: Address, size: usize) -> bool {
        if self.lab.unallocate(addr, size) {
            self.unallocated += 1;
            true
        } else {
            object_model::fill_with_object(addr, size);
            self.fillers += 1;
            false
        }
    }

    fn retire_lab(&mut self) {
        let waste = self.lab.flush();
        if waste > 0 {
            self.waste += waste;
            self.space.record_waste(waste);
        }
    }

    /// Plug the buffer so the space is parseable.
    pub fn flush(&mut self) {
        self.retire_lab();
    }

    pub fn mark_full(&mut self) {
        self.is_full = true;
    }

    pub fn is_full(&self) -> bool {
        self.is_full
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn allocations(&self) -> &EnumMap<AllocationPath, usize> {
        &self.allocations
    }

    pub fn unallocated(&self) -> usize {
        self.unallocated
    }

    pub fn fillers(&self) -> usize {
        self.fillers
    }

    pub fn waste(&self) -> usize {
        self.waste
    }

    /// Prepare for a new cycle. The buffer must have been flushed.
    pub fn reset(&mut self, lab_size: usize) {
        assert!(self.lab.is_flushed(), "{:?} buffer not flushed", self.generation);
        self.lab_size = lab_size;
        self.is_full = false;
        self.allocations = EnumMap::default();
        self.unallocated = 0;
        self.fillers = 0;
        self.waste = 0;
    }
}
