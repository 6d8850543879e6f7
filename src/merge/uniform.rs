use crate::error::MergeError;
use crate::index::uniform::UniformIndex;
use crate::voffset::VirtualOffset;

/// Folds per-partition uniform-granularity indexes into the index of the
/// concatenated file.
///
/// Far simpler than the binned fold: every entry of partition `i` is
/// translated by the running cumulative offset and appended, and record
/// counts accumulate. The granularity is fixed by the first partition;
/// merging indexes built at different granularities is unsupported.
pub struct UniformIndexMerger {
    cum: u64,
    granularity: Option<u64>,
    offsets: Vec<VirtualOffset>,
    total_records: u64,
    partitions: usize,
}

impl UniformIndexMerger {
    pub fn new(header_len: u64) -> Self {
        UniformIndexMerger {
            cum: header_len,
            granularity: None,
            offsets: Vec::new(),
            total_records: 0,
            partitions: 0,
        }
    }

    /// Fold the next partition's index in. `partition_len` is the byte
    /// length of that partition's compressed stream in the final file.
    pub fn process_index(
        &mut self,
        index: &UniformIndex,
        partition_len: u64,
    ) -> Result<(), MergeError> {
        let partition = self.partitions;

        match self.granularity {
            None => self.granularity = Some(index.granularity),
            Some(expected) if expected != index.granularity => {
                return Err(MergeError::GranularityMismatch {
                    partition,
                    expected,
                    found: index.granularity,
                });
            }
            Some(_) => {}
        }

        if !index.offsets.windows(2).all(|w| w[0] < w[1]) {
            return Err(MergeError::UnsortedOffsets { partition });
        }

        for &offset in &index.offsets {
            let translated =
                offset
                    .checked_translate(self.cum)
                    .ok_or(MergeError::OffsetOverflow {
                        partition,
                        offset,
                        shift: self.cum,
                    })?;
            // An entry that does not land after the merged tail points past
            // its own partition's bytes
            if self.offsets.last().is_some_and(|&last| translated <= last) {
                return Err(MergeError::UnsortedOffsets { partition });
            }
            self.offsets.push(translated);
        }

        self.total_records += index.total_records;
        self.cum += partition_len;
        self.partitions += 1;
        Ok(())
    }

    /// Close the merge with the byte length of the fully concatenated file,
    /// stored verbatim in the output.
    pub fn finish(self, total_len: u64) -> Result<UniformIndex, MergeError> {
        let granularity = self.granularity.ok_or(MergeError::EmptyMerge)?;

        Ok(UniformIndex {
            granularity,
            total_records: self.total_records,
            file_length: total_len,
            offsets: self.offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voffset::MAX_BLOCK_ADDRESS;

    fn part(granularity: u64, records: u64, offsets: &[(u64, u16)]) -> UniformIndex {
        let mut index = UniformIndex::new(granularity);
        index.total_records = records;
        for &(block, in_block) in offsets {
            index.push_offset(VirtualOffset::new(block, in_block));
        }
        index
    }

    #[test]
    fn test_two_partition_translation() {
        let part0 = part(1, 2, &[(0, 0), (0, 40)]);
        let part1 = part(1, 2, &[(0, 0), (20, 8)]);

        let mut merger = UniformIndexMerger::new(100);
        merger.process_index(&part0, 500).unwrap();
        merger.process_index(&part1, 300).unwrap();
        let merged = merger.finish(928).unwrap();

        assert_eq!(
            merged.offsets,
            vec![
                VirtualOffset::new(100, 0),
                VirtualOffset::new(100, 40),
                VirtualOffset::new(600, 0),
                VirtualOffset::new(620, 8),
            ]
        );
        assert_eq!(merged.total_records, 4);
        assert_eq!(merged.file_length, 928);
        assert_eq!(merged.granularity, 1);
    }

    #[test]
    fn test_single_partition_identity() {
        let source = part(3, 9, &[(0, 0), (15, 2), (62, 11)]);

        let mut merger = UniformIndexMerger::new(0);
        merger.process_index(&source, 80).unwrap();
        let merged = merger.finish(108).unwrap();

        assert_eq!(merged.offsets, source.offsets);
        assert_eq!(merged.total_records, source.total_records);
        assert_eq!(merged.granularity, source.granularity);
    }

    #[test]
    fn test_granularity_mismatch_is_fatal() {
        let part0 = part(1, 1, &[(0, 0)]);
        let part1 = part(2, 2, &[(0, 0)]);

        let mut merger = UniformIndexMerger::new(0);
        merger.process_index(&part0, 10).unwrap();
        let err = merger.process_index(&part1, 10).unwrap_err();
        assert_eq!(
            err,
            MergeError::GranularityMismatch {
                partition: 1,
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn test_unsorted_offsets_are_fatal() {
        let part0 = part(1, 2, &[(10, 0), (5, 0)]);

        let mut merger = UniformIndexMerger::new(0);
        let err = merger.process_index(&part0, 100).unwrap_err();
        assert_eq!(err, MergeError::UnsortedOffsets { partition: 0 });
    }

    #[test]
    fn test_offset_past_partition_is_fatal() {
        // Partition 0 claims only 10 bytes but indexes a record at block 50
        let part0 = part(1, 1, &[(50, 0)]);
        let part1 = part(1, 1, &[(0, 0)]);

        let mut merger = UniformIndexMerger::new(0);
        merger.process_index(&part0, 10).unwrap();
        let err = merger.process_index(&part1, 10).unwrap_err();
        assert_eq!(err, MergeError::UnsortedOffsets { partition: 1 });
    }

    #[test]
    fn test_overflow_is_fatal() {
        let part0 = part(1, 1, &[(MAX_BLOCK_ADDRESS, 0)]);

        let mut merger = UniformIndexMerger::new(1);
        let err = merger.process_index(&part0, 10).unwrap_err();
        assert!(matches!(err, MergeError::OffsetOverflow { partition: 0, .. }));
    }

    #[test]
    fn test_empty_merge_is_fatal() {
        let merger = UniformIndexMerger::new(0);
        assert_eq!(merger.finish(28).unwrap_err(), MergeError::EmptyMerge);
    }
}
