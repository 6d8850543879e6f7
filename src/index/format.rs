use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::index::binned::{BIN_COUNT, Bin, BinnedIndex, Chunk, ReferenceIndex};
use crate::index::uniform::UniformIndex;
use crate::voffset::VirtualOffset;

/// Magic headers of the two on-disk layouts.
pub const BINNED_MAGIC: &[u8; 4] = b"BAI\x01";
pub const UNIFORM_MAGIC: &[u8; 4] = b"SBI\x01";

/// File suffixes used by the partitioned layout.
pub const BINNED_SUFFIX: &str = ".bai";
pub const UNIFORM_SUFFIX: &str = ".sbi";

// ---- coordinate-binned layout ----
//
// magic[4] "BAI\1"
// n_ref:   i32
// per reference:
//   n_bin: i32
//   per bin: bin_id u32, n_chunk i32, then n_chunk (start u64, end u64)
//   n_intv: i32, then n_intv ioffset u64
// n_no_coor: u64 (trailing, optional on read)

pub fn read_binned<R: Read>(reader: &mut R) -> Result<BinnedIndex> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BINNED_MAGIC {
        bail!("not a binned index (bad magic {:?})", magic);
    }

    let n_ref = read_i32(reader)?;
    if n_ref < 0 {
        bail!("negative reference count {}", n_ref);
    }

    let mut references = Vec::with_capacity(n_ref as usize);
    for r in 0..n_ref {
        references.push(
            read_reference(reader).with_context(|| format!("reading reference {}", r))?,
        );
    }

    // Trailing unmapped-read count; older writers omit it.
    let unmapped_count = try_read_u64(reader).unwrap_or(0);

    Ok(BinnedIndex {
        references,
        unmapped_count,
        unmapped_start: None,
    })
}

fn read_reference<R: Read>(reader: &mut R) -> Result<ReferenceIndex> {
    let n_bin = read_i32(reader)?;
    if n_bin < 0 {
        bail!("negative bin count {}", n_bin);
    }

    let mut reference = ReferenceIndex::default();
    for _ in 0..n_bin {
        let bin_id = read_u32(reader)?;
        let n_chunk = read_i32(reader)?;
        if n_chunk < 0 {
            bail!("bin {}: negative chunk count {}", bin_id, n_chunk);
        }

        let mut chunks = Vec::with_capacity(n_chunk as usize);
        for _ in 0..n_chunk {
            let start = VirtualOffset::from_raw(read_u64(reader)?);
            let end = VirtualOffset::from_raw(read_u64(reader)?);
            chunks.push(Chunk::new(start, end));
        }

        // Ids past the binning scheme are writer metadata, not coordinate
        // bins; consume and drop them.
        if bin_id < BIN_COUNT {
            reference.bins.insert(bin_id, Bin { chunks });
        }
    }

    let n_intv = read_i32(reader)?;
    if n_intv < 0 {
        bail!("negative linear-index length {}", n_intv);
    }
    let mut linear = Vec::with_capacity(n_intv as usize);
    for _ in 0..n_intv {
        linear.push(VirtualOffset::from_raw(read_u64(reader)?));
    }
    reference.linear = linear;

    Ok(reference)
}

pub fn write_binned<W: Write>(index: &BinnedIndex, writer: &mut W) -> Result<()> {
    writer.write_all(BINNED_MAGIC)?;
    write_i32(writer, index.references.len() as i32)?;

    for reference in &index.references {
        write_i32(writer, reference.bins.len() as i32)?;
        // BTreeMap iteration gives the canonical ascending-id order
        for (bin_id, bin) in &reference.bins {
            write_u32(writer, *bin_id)?;
            write_i32(writer, bin.chunks.len() as i32)?;
            for chunk in &bin.chunks {
                write_u64(writer, chunk.start.as_raw())?;
                write_u64(writer, chunk.end.as_raw())?;
            }
        }
        write_i32(writer, reference.linear.len() as i32)?;
        for offset in &reference.linear {
            write_u64(writer, offset.as_raw())?;
        }
    }

    write_u64(writer, index.unmapped_count)?;
    Ok(())
}

// ---- uniform-granularity layout ----
//
// magic[4] "SBI\1"
// file_length:   u64
// total_records: u64
// granularity:   u64
// n_offsets:     u64, then n_offsets virtual offsets u64

pub fn read_uniform<R: Read>(reader: &mut R) -> Result<UniformIndex> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != UNIFORM_MAGIC {
        bail!("not a uniform index (bad magic {:?})", magic);
    }

    let file_length = read_u64(reader)?;
    let total_records = read_u64(reader)?;
    let granularity = read_u64(reader)?;
    if granularity == 0 {
        bail!("granularity must be at least 1");
    }

    let n_offsets = read_u64(reader)?;
    let mut offsets = Vec::with_capacity(n_offsets.min(1 << 20) as usize);
    for _ in 0..n_offsets {
        offsets.push(VirtualOffset::from_raw(read_u64(reader)?));
    }

    Ok(UniformIndex {
        granularity,
        total_records,
        file_length,
        offsets,
    })
}

pub fn write_uniform<W: Write>(index: &UniformIndex, writer: &mut W) -> Result<()> {
    writer.write_all(UNIFORM_MAGIC)?;
    write_u64(writer, index.file_length)?;
    write_u64(writer, index.total_records)?;
    write_u64(writer, index.granularity)?;
    write_u64(writer, index.offsets.len() as u64)?;
    for offset in &index.offsets {
        write_u64(writer, offset.as_raw())?;
    }
    Ok(())
}

// ---- file wrappers ----

pub fn load_binned<P: AsRef<Path>>(path: P) -> Result<BinnedIndex> {
    let path = path.as_ref();
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    read_binned(&mut reader).with_context(|| format!("decoding {}", path.display()))
}

pub fn save_binned<P: AsRef<Path>>(index: &BinnedIndex, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    write_binned(index, &mut writer)?;
    writer.flush()?;
    Ok(())
}

pub fn load_uniform<P: AsRef<Path>>(path: P) -> Result<UniformIndex> {
    let path = path.as_ref();
    let mut reader = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    read_uniform(&mut reader).with_context(|| format!("decoding {}", path.display()))
}

pub fn save_uniform<P: AsRef<Path>>(index: &UniformIndex, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    write_uniform(index, &mut writer)?;
    writer.flush()?;
    Ok(())
}

// ---- little-endian helpers ----

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn try_read_u64<R: Read>(reader: &mut R) -> Option<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).ok()?;
    Some(u64::from_le_bytes(buf))
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}
