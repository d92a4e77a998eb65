//! Utilities used by the rest of the crate: address arithmetic, the object model, local
//! allocation buffers, the memory-region control plane and the copying engine.

/// Address and object reference types.
pub mod address;
/// Per-worker local allocation buffers.
pub mod alloc;
/// Constants used in the crate.
pub mod constants;
/// Calculation, conversion and rounding for memory related numbers.
pub mod conversions;
/// The copy-forward promotion engine.
pub mod copy;
/// Physical and virtual memory bookkeeping.
pub mod heap;
/// Logger initialization.
pub mod logger;
/// Wrapper functions for OS memory operations.
pub mod memory;
/// Atomic forwarding of objects through their header word.
pub mod object_forwarding;
/// Object layout: header words, shapes, sizes and filler objects.
pub mod object_model;
/// Tunables supplied before startup.
pub mod options;

#[cfg(test)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
