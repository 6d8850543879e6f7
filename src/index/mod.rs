pub mod binned;
pub mod format;
pub mod uniform;

pub use binned::{Bin, BinnedIndex, Chunk, ReferenceIndex};
pub use uniform::UniformIndex;
