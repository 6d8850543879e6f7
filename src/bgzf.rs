use anyhow::{Context, Result, anyhow};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// BGZF block format constants
pub const BGZF_BLOCK_MAX_SIZE: usize = 65536; // Maximum compressed BGZF block size
pub const BGZF_HEADER_SIZE: usize = 18;
pub const BGZF_FOOTER_SIZE: usize = 8;
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The fixed 28-byte empty block that terminates a BGZF file. Appended
/// exactly once, after the last partition; never present between partitions
/// of a well-formed partitioned file.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02,
    0x00, 0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Byte span of one compressed block within its file.
#[derive(Debug, Clone, Copy)]
pub struct BlockSpan {
    pub offset: usize,
    pub len: usize,
}

impl BlockSpan {
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.offset + self.len]
    }
}

/// What a layout scan learned about one partition's compressed stream.
#[derive(Debug, Clone)]
pub struct PartitionLayout {
    /// Total compressed byte length, i.e. the number of bytes the partition
    /// contributes to the concatenated file.
    pub byte_len: u64,
    pub block_count: usize,
    /// Whether the stream's last block is the empty terminator block.
    pub ends_with_eof: bool,
}

/// Validate a BGZF block header and return the block's total compressed size.
pub fn block_size(header: &[u8]) -> Result<usize> {
    if header.len() < BGZF_HEADER_SIZE {
        return Err(anyhow!("insufficient data for BGZF header"));
    }

    if header[0..2] != GZIP_MAGIC {
        return Err(anyhow!("invalid GZIP magic bytes"));
    }

    // BSIZE field at bytes 16-17 holds total block size minus one
    let bsize = u16::from_le_bytes([header[16], header[17]]) as usize;
    let total_size = bsize + 1;

    if total_size < BGZF_HEADER_SIZE + BGZF_FOOTER_SIZE || total_size > BGZF_BLOCK_MAX_SIZE {
        return Err(anyhow!("invalid BGZF block size: {}", total_size));
    }

    Ok(total_size)
}

/// Discover the spans of all complete BGZF blocks in the given data.
/// Trailing bytes that do not form a complete block are an error; a
/// partition must be an exact sequence of whole blocks.
pub fn block_spans(data: &[u8]) -> Result<Vec<BlockSpan>> {
    let mut spans = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + BGZF_HEADER_SIZE > data.len() {
            return Err(anyhow!("truncated BGZF block at byte {}", pos));
        }

        let len = block_size(&data[pos..pos + BGZF_HEADER_SIZE])
            .with_context(|| format!("bad BGZF block at byte {}", pos))?;

        if pos + len > data.len() {
            return Err(anyhow!("truncated BGZF block at byte {}", pos));
        }

        spans.push(BlockSpan { offset: pos, len });
        pos += len;
    }

    Ok(spans)
}

/// Scan a partition's compressed stream and summarize its block layout.
pub fn scan_layout(data: &[u8]) -> Result<PartitionLayout> {
    let spans = block_spans(data)?;
    let ends_with_eof = spans
        .last()
        .map(|s| s.slice(data) == BGZF_EOF)
        .unwrap_or(false);

    Ok(PartitionLayout {
        byte_len: data.len() as u64,
        block_count: spans.len(),
        ends_with_eof,
    })
}

/// Memory-map a partition file and scan its block layout.
pub fn scan_file<P: AsRef<Path>>(path: P) -> Result<PartitionLayout> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;
    scan_layout(&mmap).with_context(|| format!("scanning {}", path.display()))
}
