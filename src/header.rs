use anyhow::{Context, Result, anyhow, bail};
use libdeflater::Decompressor;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use crate::bgzf::{self, BGZF_BLOCK_MAX_SIZE};

/// One reference sequence from the shared header, in header order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    pub name: String,
    pub length: u32,
}

/// The ordered reference-sequence dictionary parsed from a BAM header.
///
/// The merge consumes this read-only: the sequence count validates that
/// every partition's index was built against the same header, and the names
/// make diagnostics readable. Alignment records are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDictionary {
    sequences: Vec<ReferenceSequence>,
}

impl ReferenceDictionary {
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn get(&self, reference: usize) -> Option<&ReferenceSequence> {
        self.sequences.get(reference)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceSequence> {
        self.sequences.iter()
    }

    /// Decompress a header-only BGZF file and parse its dictionary.
    pub fn from_header_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mmap =
            unsafe { Mmap::map(&file) }.with_context(|| format!("mapping {}", path.display()))?;

        let text = decompress_all(&mmap)
            .with_context(|| format!("decompressing header {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing header {}", path.display()))
    }

    /// Parse the uncompressed BAM header layout: magic, SAM text, then the
    /// reference dictionary.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        if cursor.take(4)? != b"BAM\x01" {
            bail!("not a BAM header (bad magic)");
        }

        let l_text = cursor.read_i32()?;
        if l_text < 0 {
            bail!("negative header text length {}", l_text);
        }
        cursor.take(l_text as usize)?; // SAM text, unused here

        let n_ref = cursor.read_i32()?;
        if n_ref < 0 {
            bail!("negative reference count {}", n_ref);
        }

        let mut sequences = Vec::with_capacity(n_ref as usize);
        for i in 0..n_ref {
            let l_name = cursor.read_i32()?;
            if l_name <= 0 {
                bail!("reference {}: bad name length {}", i, l_name);
            }
            let raw_name = cursor.take(l_name as usize)?;
            // l_name counts the trailing NUL
            let name = match raw_name.split_last() {
                Some((0, body)) => String::from_utf8_lossy(body).into_owned(),
                _ => bail!("reference {}: name is not NUL-terminated", i),
            };
            let length = cursor.read_i32()?;
            if length < 0 {
                bail!("reference {} ({}): negative length {}", i, name, length);
            }
            sequences.push(ReferenceSequence {
                name,
                length: length as u32,
            });
        }

        Ok(ReferenceDictionary { sequences })
    }
}

/// Decompress every block of a BGZF stream into one contiguous buffer.
/// This is the only place the crate inflates anything, and it only ever
/// sees the small header file.
fn decompress_all(data: &[u8]) -> Result<Vec<u8>> {
    let spans = bgzf::block_spans(data)?;
    let mut decompressor = Decompressor::new();
    let mut block_buf = vec![0u8; BGZF_BLOCK_MAX_SIZE];
    let mut out = Vec::new();

    for span in spans {
        let n = decompressor
            .gzip_decompress(span.slice(data), &mut block_buf)
            .map_err(|e| anyhow!("BGZF decompression failed: {:?}", e))?;
        out.extend_from_slice(&block_buf[..n]);
    }

    Ok(out)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            bail!("header truncated at byte {}", self.pos);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
