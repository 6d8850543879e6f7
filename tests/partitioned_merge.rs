//! End-to-end merge of a synthetic partitioned BAM directory.

use std::fs;
use std::path::Path;

use bamerge::bgzf::BGZF_EOF;
use bamerge::index::format;
use bamerge::{BinnedIndex, Chunk, PartitionedBam, UniformIndex, VirtualOffset};

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// A BGZF block holding `payload` as a stored (uncompressed) deflate block.
fn bgzf_block(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 0xFFFF);
    let mut deflate = Vec::with_capacity(payload.len() + 5);
    deflate.push(0x01); // final stored block
    deflate.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    deflate.extend_from_slice(&(!(payload.len() as u16)).to_le_bytes());
    deflate.extend_from_slice(payload);

    let total = 18 + deflate.len() + 8;
    let mut block = Vec::with_capacity(total);
    block.extend_from_slice(&[0x1f, 0x8b, 0x08, 0x04, 0, 0, 0, 0, 0, 0xff]);
    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
    block.extend_from_slice(&[b'B', b'C', 2, 0]);
    block.extend_from_slice(&((total - 1) as u16).to_le_bytes());
    block.extend_from_slice(&deflate);
    block.extend_from_slice(&crc32(payload).to_le_bytes());
    block.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    block
}

/// Uncompressed BAM header bytes for the given reference dictionary.
fn bam_header(refs: &[(&str, u32)]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"BAM\x01");
    let text = b"@HD\tVN:1.6\n";
    data.extend_from_slice(&(text.len() as i32).to_le_bytes());
    data.extend_from_slice(text);
    data.extend_from_slice(&(refs.len() as i32).to_le_bytes());
    for (name, length) in refs {
        data.extend_from_slice(&((name.len() + 1) as i32).to_le_bytes());
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(&(*length as i32).to_le_bytes());
    }
    data
}

fn vo(block: u64, in_block: u16) -> VirtualOffset {
    VirtualOffset::new(block, in_block)
}

struct Part {
    data: Vec<u8>,
    binned: BinnedIndex,
    uniform: UniformIndex,
}

fn write_partitioned_dir(dir: &Path, parts: &[Part]) {
    let header = bgzf_block(&bam_header(&[("chr1", 100_000)]));
    fs::write(dir.join("header"), &header).unwrap();
    fs::write(dir.join("terminator"), BGZF_EOF).unwrap();

    for (i, part) in parts.iter().enumerate() {
        let name = format!("part-{:05}", i);
        fs::write(dir.join(&name), &part.data).unwrap();
        format::save_binned(&part.binned, dir.join(format!(".{name}.bai"))).unwrap();
        format::save_uniform(&part.uniform, dir.join(format!(".{name}.sbi"))).unwrap();
    }
}

fn two_partitions() -> Vec<Part> {
    let data0 = bgzf_block(&[0xAAu8; 200]);
    let mut binned0 = BinnedIndex::new(1);
    binned0.add_chunk(0, 4681, Chunk::new(vo(0, 0), vo(0, 50)));
    binned0.references[0].linear = vec![vo(0, 0)];
    let mut uniform0 = UniformIndex::new(1);
    uniform0.push_offset(vo(0, 0));
    uniform0.push_offset(vo(0, 25));
    uniform0.total_records = 2;
    uniform0.file_length = data0.len() as u64;

    let data1 = bgzf_block(&[0xBBu8; 300]);
    let mut binned1 = BinnedIndex::new(1);
    binned1.add_chunk(0, 4681, Chunk::new(vo(0, 10), vo(0, 60)));
    binned1.references[0].linear = vec![vo(0, 10)];
    binned1.unmapped_count = 4;
    let mut uniform1 = UniformIndex::new(1);
    uniform1.push_offset(vo(0, 10));
    uniform1.total_records = 1;
    uniform1.file_length = data1.len() as u64;

    vec![
        Part {
            data: data0,
            binned: binned0,
            uniform: uniform0,
        },
        Part {
            data: data1,
            binned: binned1,
            uniform: uniform1,
        },
    ]
}

#[test]
fn merges_directory_into_bam_and_indexes() {
    let tmp = tempfile::tempdir().unwrap();
    let parts = two_partitions();
    write_partitioned_dir(tmp.path(), &parts);

    let out = tmp.path().join("out.bam");
    let layout = PartitionedBam::open(tmp.path()).unwrap();
    let summary = layout.merge(&out, Some(2)).unwrap();

    let header = fs::read(tmp.path().join("header")).unwrap();
    let h = header.len() as u64;
    let l0 = parts[0].data.len() as u64;
    let l1 = parts[1].data.len() as u64;
    let total = h + l0 + l1 + BGZF_EOF.len() as u64;

    assert_eq!(summary.partitions, 2);
    assert_eq!(summary.references, 1);
    assert_eq!(summary.total_len, total);
    assert_eq!(summary.total_records, 3);
    assert_eq!(summary.unmapped_count, 4);

    // The output BAM is the exact concatenation
    let mut expected_bam = header.clone();
    expected_bam.extend_from_slice(&parts[0].data);
    expected_bam.extend_from_slice(&parts[1].data);
    expected_bam.extend_from_slice(&BGZF_EOF);
    assert_eq!(fs::read(&out).unwrap(), expected_bam);

    // The merged binned index equals the hand-translated expectation,
    // byte for byte once serialized
    let mut expected_binned = BinnedIndex::new(1);
    expected_binned.add_chunk(0, 4681, Chunk::new(vo(h, 0), vo(h, 50)));
    expected_binned.add_chunk(0, 4681, Chunk::new(vo(h + l0, 10), vo(h + l0, 60)));
    expected_binned.references[0].linear = vec![vo(h, 0)];
    expected_binned.unmapped_count = 4;

    let merged_binned = format::load_binned(tmp.path().join("out.bam.bai")).unwrap();
    assert_eq!(merged_binned, expected_binned);

    let mut expected_bytes = Vec::new();
    format::write_binned(&expected_binned, &mut expected_bytes).unwrap();
    assert_eq!(
        fs::read(tmp.path().join("out.bam.bai")).unwrap(),
        expected_bytes
    );

    // Same for the uniform index
    let merged_uniform = format::load_uniform(tmp.path().join("out.bam.sbi")).unwrap();
    assert_eq!(
        merged_uniform.offsets,
        vec![vo(h, 0), vo(h, 25), vo(h + l0, 10)]
    );
    assert_eq!(merged_uniform.total_records, 3);
    assert_eq!(merged_uniform.granularity, 1);
    assert_eq!(merged_uniform.file_length, total);

    let mut expected_uniform = UniformIndex::new(1);
    expected_uniform.push_offset(vo(h, 0));
    expected_uniform.push_offset(vo(h, 25));
    expected_uniform.push_offset(vo(h + l0, 10));
    expected_uniform.total_records = 3;
    expected_uniform.file_length = total;

    let mut expected_bytes = Vec::new();
    format::write_uniform(&expected_uniform, &mut expected_bytes).unwrap();
    assert_eq!(
        fs::read(tmp.path().join("out.bam.sbi")).unwrap(),
        expected_bytes
    );
}

#[test]
fn single_partition_directory_round_trips() {
    let tmp = tempfile::tempdir().unwrap();
    let mut parts = two_partitions();
    parts.truncate(1);
    write_partitioned_dir(tmp.path(), &parts);

    let out = tmp.path().join("out.bam");
    let summary = PartitionedBam::open(tmp.path())
        .unwrap()
        .merge(&out, Some(1))
        .unwrap();

    let h = fs::read(tmp.path().join("header")).unwrap().len() as u64;
    assert_eq!(summary.partitions, 1);

    // One partition: the merge is pure translation by the header length
    let merged = format::load_binned(tmp.path().join("out.bam.bai")).unwrap();
    let chunks = &merged.references[0].bins[&4681].chunks;
    assert_eq!(chunks, &vec![Chunk::new(vo(h, 0), vo(h, 50))]);
}

#[test]
fn reference_mismatch_leaves_no_output() {
    let tmp = tempfile::tempdir().unwrap();
    let mut parts = two_partitions();
    // Partition 1 claims a reference the header does not declare
    parts[1].binned = BinnedIndex::new(2);
    write_partitioned_dir(tmp.path(), &parts);

    let out = tmp.path().join("out.bam");
    let err = PartitionedBam::open(tmp.path())
        .unwrap()
        .merge(&out, Some(1))
        .unwrap_err();
    assert!(err.to_string().contains("reference"));

    assert!(!out.exists());
    assert!(!tmp.path().join("out.bam.bai").exists());
    assert!(!tmp.path().join("out.bam.sbi").exists());
}
