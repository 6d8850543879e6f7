use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::PathBuf;

use crate::error::MergeError;
use crate::index::binned::BinnedIndex;
use crate::index::format;
use crate::index::uniform::UniformIndex;
use crate::merge::binned::BinnedIndexMerger;
use crate::merge::uniform::UniformIndexMerger;

/// One partition's decoded indexes plus its compressed byte length.
#[derive(Debug, Clone)]
pub struct Partition {
    pub binned: BinnedIndex,
    pub uniform: UniformIndex,
    pub byte_len: u64,
}

/// Paths to one partition's index files, in partition order, plus the byte
/// length of the partition's data file.
#[derive(Debug, Clone)]
pub struct PartitionFiles {
    pub binned: PathBuf,
    pub uniform: PathBuf,
    pub byte_len: u64,
}

/// Runs both mergers in lockstep over the same partition sequence.
///
/// Both folds consume the identical cumulative-offset schedule, so a single
/// pass over the partitions produces both merged indexes. The driver owns
/// the two in-progress structures exclusively; the fold is strictly
/// sequential in partition order (see `load_partitions` for where the
/// parallelism lives).
pub struct MergeDriver {
    binned: BinnedIndexMerger,
    uniform: UniformIndexMerger,
}

impl MergeDriver {
    /// `header_len` is the byte length of the shared header written before
    /// partition 0; `reference_count` comes from that header's dictionary
    /// and validates every partition.
    pub fn new(header_len: u64, reference_count: usize) -> Self {
        MergeDriver {
            binned: BinnedIndexMerger::new(header_len, reference_count),
            uniform: UniformIndexMerger::new(header_len),
        }
    }

    /// Fold the next partition, in file order, into both merged indexes.
    pub fn process_partition(&mut self, partition: &Partition) -> Result<(), MergeError> {
        self.binned
            .process_index(&partition.binned, partition.byte_len)?;
        self.uniform
            .process_index(&partition.uniform, partition.byte_len)?;
        Ok(())
    }

    /// Close both merges with the byte length of the fully concatenated
    /// file (header + partitions + terminator block).
    pub fn finish(self, total_len: u64) -> Result<(BinnedIndex, UniformIndex), MergeError> {
        let binned = self.binned.finish(total_len)?;
        let uniform = self.uniform.finish(total_len)?;
        Ok((binned, uniform))
    }

    /// One-shot merge over pre-loaded partitions.
    pub fn merge(
        header_len: u64,
        reference_count: usize,
        partitions: &[Partition],
        total_len: u64,
    ) -> Result<(BinnedIndex, UniformIndex), MergeError> {
        let mut driver = MergeDriver::new(header_len, reference_count);
        for partition in partitions {
            driver.process_partition(partition)?;
        }
        driver.finish(total_len)
    }
}

/// Decode every partition's index files in parallel.
///
/// Decoding is embarrassingly parallel; only the fold is order-sensitive.
/// The indexed collect stages each result in its partition's slot, so the
/// returned vector is in partition order regardless of completion order.
pub fn load_partitions(files: &[PartitionFiles]) -> Result<Vec<Partition>> {
    files
        .par_iter()
        .map(|f| {
            let binned = format::load_binned(&f.binned)?;
            let uniform = format::load_uniform(&f.uniform)?;
            Ok(Partition {
                binned,
                uniform,
                byte_len: f.byte_len,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("loading partition indexes")
}
