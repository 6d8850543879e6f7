use crate::error::MergeError;
use crate::index::binned::{BinnedIndex, Chunk};
use crate::voffset::{MAX_BLOCK_ADDRESS, VirtualOffset};

/// Folds per-partition coordinate-binned indexes into the index of the
/// concatenated file.
///
/// Partitions must be processed strictly in file order: the merger keeps a
/// running cumulative byte offset, starting at the shared header length,
/// and translates every offset of partition `i` by the bytes of everything
/// written before it. Because chunks within a partition are already in file
/// order, appending translated chunks keeps every merged bin sorted by
/// construction; nothing is ever re-sorted.
pub struct BinnedIndexMerger {
    cum: u64,
    expected_references: usize,
    merged: BinnedIndex,
    partitions: usize,
}

impl BinnedIndexMerger {
    pub fn new(header_len: u64, reference_count: usize) -> Self {
        BinnedIndexMerger {
            cum: header_len,
            expected_references: reference_count,
            merged: BinnedIndex::new(reference_count),
            partitions: 0,
        }
    }

    /// Fold the next partition's index in. `partition_len` is the byte
    /// length of that partition's compressed stream in the final file.
    pub fn process_index(
        &mut self,
        index: &BinnedIndex,
        partition_len: u64,
    ) -> Result<(), MergeError> {
        let partition = self.partitions;

        if index.reference_count() != self.expected_references {
            return Err(MergeError::ReferenceCountMismatch {
                partition,
                expected: self.expected_references,
                found: index.reference_count(),
            });
        }

        for (reference, source) in index.references.iter().enumerate() {
            for (&bin_id, bin) in &source.bins {
                if !chunks_sorted(&bin.chunks) {
                    return Err(MergeError::UnsortedChunks {
                        partition,
                        reference,
                        bin: bin_id,
                    });
                }

                let mut translated = Vec::with_capacity(bin.chunks.len());
                for chunk in &bin.chunks {
                    let start = self.translate(partition, chunk.start)?;
                    let end = self.translate(partition, chunk.end)?;
                    translated.push(Chunk::new(start, end));
                }
                self.merged.references[reference]
                    .bins
                    .entry(bin_id)
                    .or_default()
                    .chunks
                    .extend(translated);
            }

            if !linear_monotonic(&source.linear) {
                return Err(MergeError::UnsortedLinearIndex {
                    partition,
                    reference,
                });
            }

            // Windows the merged index already covers keep their entries:
            // an earlier partition's record is the true minimum for them.
            // Windows this partition introduces are appended, translated;
            // a zero entry means the partition saw no record for that
            // window, so the last known offset carries forward.
            let covered = self.merged.references[reference].linear.len();
            let mut last = self.merged.references[reference]
                .linear
                .last()
                .copied()
                .unwrap_or(VirtualOffset::ZERO);
            let mut appended = Vec::new();
            for &entry in source.linear.iter().skip(covered) {
                let value = if entry == VirtualOffset::ZERO {
                    last
                } else {
                    self.translate(partition, entry)?
                };
                appended.push(value);
                last = value;
            }
            self.merged.references[reference].linear.extend(appended);
        }

        // Unmapped reads trail the mapped references, so the first
        // partition that has any fixes where they begin; later partitions
        // only grow the count.
        if self.merged.unmapped_start.is_none() {
            if let Some(start) = index.unmapped_start {
                self.merged.unmapped_start = Some(self.translate(partition, start)?);
            }
        }
        self.merged.unmapped_count += index.unmapped_count;

        self.cum += partition_len;
        self.partitions += 1;
        Ok(())
    }

    /// Close the merge with the byte length of the fully concatenated file
    /// (header + every partition + terminator). Any chunk end still left as
    /// the open sentinel resolves to that length.
    pub fn finish(mut self, total_len: u64) -> Result<BinnedIndex, MergeError> {
        if self.partitions == 0 {
            return Err(MergeError::EmptyMerge);
        }
        if total_len > MAX_BLOCK_ADDRESS {
            return Err(MergeError::FileTooLarge(total_len));
        }

        let close = VirtualOffset::new(total_len, 0);
        for reference in &mut self.merged.references {
            for bin in reference.bins.values_mut() {
                for chunk in &mut bin.chunks {
                    if chunk.is_open_ended() {
                        chunk.end = close;
                    }
                }
            }
        }

        Ok(self.merged)
    }

    fn translate(
        &self,
        partition: usize,
        offset: VirtualOffset,
    ) -> Result<VirtualOffset, MergeError> {
        offset
            .checked_translate(self.cum)
            .ok_or(MergeError::OffsetOverflow {
                partition,
                offset,
                shift: self.cum,
            })
    }
}

/// Chunks must form increasing, disjoint intervals. An unsorted list means
/// the partition index is corrupt or foreign-built; it is rejected, never
/// repaired.
fn chunks_sorted(chunks: &[Chunk]) -> bool {
    chunks.iter().all(|c| c.start <= c.end)
        && chunks.windows(2).all(|w| w[0].end <= w[1].start)
}

/// Populated linear-index entries must never decrease; zero placeholders
/// may appear anywhere.
fn linear_monotonic(linear: &[VirtualOffset]) -> bool {
    let mut last = VirtualOffset::ZERO;
    for &entry in linear {
        if entry == VirtualOffset::ZERO {
            continue;
        }
        if entry < last {
            return false;
        }
        last = entry;
    }
    true
}
