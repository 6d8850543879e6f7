//! Index merging for partitioned, BGZF-compressed BAM output.
//!
//! Partitions of one logical BAM file, written and indexed independently,
//! are combined into the indexes of the concatenated file by translating
//! virtual offsets across partition boundaries. No alignment data is read
//! or decompressed; the merge works entirely on index structures and
//! partition byte lengths.

pub mod bgzf;
pub mod concat;
pub mod error;
pub mod header;
pub mod index;
pub mod merge;
pub mod partitioned;
pub mod voffset;

// Re-export main types for public API
pub use error::MergeError;
pub use header::{ReferenceDictionary, ReferenceSequence};
pub use index::{Bin, BinnedIndex, Chunk, ReferenceIndex, UniformIndex};
pub use merge::{
    BinnedIndexMerger, MergeDriver, Partition, PartitionFiles, UniformIndexMerger,
    load_partitions,
};
pub use partitioned::{MergeSummary, PartitionedBam};
pub use voffset::VirtualOffset;
