//! Spaces and the policies for sizing them.

pub mod sizing;
pub mod space;

pub use sizing::GenerationSizer;
pub use space::ContiguousSpace;
