use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bgzf::{self, BGZF_EOF};
use crate::concat;
use crate::header::ReferenceDictionary;
use crate::index::format::{self, BINNED_SUFFIX, UNIFORM_SUFFIX};
use crate::merge::{MergeDriver, PartitionFiles, load_partitions};

pub const HEADER_NAME: &str = "header";
pub const TERMINATOR_NAME: &str = "terminator";
pub const PART_PREFIX: &str = "part-";

/// A partitioned BAM directory.
///
/// Layout contract: a file named `header` holding the shared header in BAM
/// format, data files `part-00000`, `part-00001`, … holding headerless
/// alignment partitions, a file named `terminator` holding the empty
/// end-of-stream block, and for every part a hidden `.part-NNNNN.bai` /
/// `.part-NNNNN.sbi` pair with the partition's indexes. Concatenating the
/// visible files in name order yields a single valid BAM; merging the
/// hidden files yields its indexes.
#[derive(Debug)]
pub struct PartitionedBam {
    header: PathBuf,
    terminator: PathBuf,
    parts: Vec<PathBuf>,
    index_parts: Vec<(PathBuf, PathBuf)>,
}

/// What a directory merge produced, for reporting.
#[derive(Debug)]
pub struct MergeSummary {
    pub partitions: usize,
    pub references: usize,
    pub total_len: u64,
    pub total_records: u64,
    pub unmapped_count: u64,
}

impl PartitionedBam {
    /// Discover and validate the directory layout. Every part must carry
    /// both hidden index files.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let header = dir.join(HEADER_NAME);
        if !header.is_file() {
            bail!("{}: missing '{}' file", dir.display(), HEADER_NAME);
        }
        let terminator = dir.join(TERMINATOR_NAME);
        if !terminator.is_file() {
            bail!("{}: missing '{}' file", dir.display(), TERMINATOR_NAME);
        }

        let mut part_names: Vec<String> = fs::read_dir(dir)
            .with_context(|| format!("listing {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(PART_PREFIX))
            .collect();
        part_names.sort();

        if part_names.is_empty() {
            bail!("{}: no '{}NNNNN' data files", dir.display(), PART_PREFIX);
        }

        let mut parts = Vec::with_capacity(part_names.len());
        let mut index_parts = Vec::with_capacity(part_names.len());
        for name in &part_names {
            let binned = dir.join(format!(".{}{}", name, BINNED_SUFFIX));
            let uniform = dir.join(format!(".{}{}", name, UNIFORM_SUFFIX));
            if !binned.is_file() {
                bail!("{}: missing index {}", dir.display(), binned.display());
            }
            if !uniform.is_file() {
                bail!("{}: missing index {}", dir.display(), uniform.display());
            }
            parts.push(dir.join(name));
            index_parts.push((binned, uniform));
        }

        Ok(PartitionedBam {
            header,
            terminator,
            parts,
            index_parts,
        })
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Merge the directory into `output` plus `<output>.bai` and
    /// `<output>.sbi`. Output files are written only after both merges have
    /// succeeded; a failed merge leaves nothing behind.
    pub fn merge<P: AsRef<Path>>(&self, output: P, threads: Option<usize>) -> Result<MergeSummary> {
        let output = output.as_ref();

        let dictionary = ReferenceDictionary::from_header_file(&self.header)?;
        let header_len = fs::metadata(&self.header)?.len();

        let terminator = fs::read(&self.terminator)
            .with_context(|| format!("reading {}", self.terminator.display()))?;
        if terminator != BGZF_EOF {
            bail!(
                "{}: not the empty end-of-stream block",
                self.terminator.display()
            );
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or_else(num_cpus::get))
            .build()
            .context("building worker pool")?;

        let (layouts, partitions) = pool.install(|| -> Result<_> {
            let layouts = self
                .parts
                .par_iter()
                .map(bgzf::scan_file)
                .collect::<Result<Vec<_>>>()?;

            let files: Vec<PartitionFiles> = self
                .index_parts
                .iter()
                .zip(&layouts)
                .map(|((binned, uniform), layout)| PartitionFiles {
                    binned: binned.clone(),
                    uniform: uniform.clone(),
                    byte_len: layout.byte_len,
                })
                .collect();

            let partitions = load_partitions(&files)?;
            Ok((layouts, partitions))
        })?;

        for (path, layout) in self.parts.iter().zip(&layouts) {
            if layout.ends_with_eof {
                eprintln!(
                    "warning: {} ends with its own end-of-stream block",
                    path.display()
                );
            }
        }

        let parts_len: u64 = layouts.iter().map(|l| l.byte_len).sum();
        let total_len = header_len + parts_len + BGZF_EOF.len() as u64;

        // Merge first; only a fully successful merge reaches the filesystem.
        let (binned, uniform) = MergeDriver::merge(
            header_len,
            dictionary.len(),
            &partitions,
            total_len,
        )?;

        let mut sources = Vec::with_capacity(self.parts.len() + 2);
        sources.push(self.header.clone());
        sources.extend(self.parts.iter().cloned());
        sources.push(self.terminator.clone());

        let written = concat::concatenate(&sources, output)?;
        if written != total_len {
            bail!(
                "{}: wrote {} bytes, expected {}",
                output.display(),
                written,
                total_len
            );
        }

        format::save_binned(&binned, suffixed(output, BINNED_SUFFIX))?;
        format::save_uniform(&uniform, suffixed(output, UNIFORM_SUFFIX))?;

        Ok(MergeSummary {
            partitions: partitions.len(),
            references: dictionary.len(),
            total_len,
            total_records: uniform.total_records,
            unmapped_count: binned.unmapped_count,
        })
    }
}

/// `out.bam` -> `out.bam.bai` style sibling path.
pub fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
