pub mod binned;
pub mod driver;
pub mod uniform;

pub use binned::BinnedIndexMerger;
pub use driver::{MergeDriver, Partition, PartitionFiles, load_partitions};
pub use uniform::UniformIndexMerger;
