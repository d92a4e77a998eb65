//! Thread-local allocation buffers used by the promotion engine.

mod bumppointer;

pub use self::bumppointer::LocalAllocBuffer;
