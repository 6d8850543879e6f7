use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::PathBuf;

use bamerge::index::format;
use bamerge::{BinnedIndex, PartitionedBam, UniformIndex};

#[derive(Debug, Parser)]
pub struct MergeArgs {
    /// Partitioned BAM directory (header, part-NNNNN files, terminator)
    pub dir: PathBuf,

    /// Merged BAM output path; indexes are written alongside as
    /// <output>.bai and <output>.sbi
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Worker threads for scanning parts and decoding partition indexes
    /// (default: all cores)
    #[arg(long)]
    pub threads: Option<usize>,
}

/// The top-level CLI definition with subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge a partitioned BAM directory into one BAM plus merged indexes
    Merge(MergeArgs),

    /// Print a text rendering of a .bai or .sbi index file
    Dump {
        /// Index file to render
        input: PathBuf,
    },
}

#[derive(Debug, Parser)]
#[command(name = "bamerge", author, version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Merge(args) => cmd_merge(args),
        Commands::Dump { input } => cmd_dump(input),
    }
}

/// `bamerge merge <dir> -o <out.bam>`
fn cmd_merge(args: MergeArgs) -> Result<()> {
    let layout = PartitionedBam::open(&args.dir)?;
    eprintln!(
        "Merging {} partitions from {:?}...",
        layout.part_count(),
        args.dir
    );

    let summary = layout.merge(&args.output, args.threads)?;

    eprintln!(
        "Merged {} partitions over {} references",
        summary.partitions, summary.references
    );
    eprintln!("   Output: {:?} ({} bytes)", args.output, summary.total_len);
    eprintln!(
        "   Records: {} ({} unmapped)",
        summary.total_records, summary.unmapped_count
    );
    Ok(())
}

/// `bamerge dump <index>`
fn cmd_dump(input: PathBuf) -> Result<()> {
    let mut file =
        File::open(&input).with_context(|| format!("opening {}", input.display()))?;
    let mut magic = [0u8; 4];
    file.read_exact(&mut magic)
        .with_context(|| format!("reading {}", input.display()))?;
    file.rewind()?;
    let mut reader = BufReader::new(file);

    if magic == *format::BINNED_MAGIC {
        let index = format::read_binned(&mut reader)
            .with_context(|| format!("decoding {}", input.display()))?;
        dump_binned(&index);
    } else if magic == *format::UNIFORM_MAGIC {
        let index = format::read_uniform(&mut reader)
            .with_context(|| format!("decoding {}", input.display()))?;
        dump_uniform(&index);
    } else {
        bail!("{}: not a recognized index file", input.display());
    }
    Ok(())
}

fn dump_binned(index: &BinnedIndex) {
    println!(
        "binned index: {} references, {} bins, {} chunks",
        index.reference_count(),
        index.bin_count(),
        index.chunk_count()
    );
    for (r, reference) in index.references.iter().enumerate() {
        if reference.bins.is_empty() && reference.linear.is_empty() {
            continue;
        }
        println!(
            "reference {}: {} bins, {} linear windows",
            r,
            reference.bins.len(),
            reference.linear.len()
        );
        for (bin_id, bin) in &reference.bins {
            println!("  bin {} ({} chunks)", bin_id, bin.chunks.len());
            for chunk in &bin.chunks {
                println!("    {} .. {}", chunk.start, chunk.end);
            }
        }
        for (window, offset) in reference.linear.iter().enumerate() {
            println!("  window {} -> {}", window, offset);
        }
    }
    println!("unmapped reads: {}", index.unmapped_count);
}

fn dump_uniform(index: &UniformIndex) {
    println!(
        "uniform index: {} records every {} record(s), file length {}",
        index.total_records, index.granularity, index.file_length
    );
    for offset in &index.offsets {
        println!("  {}", offset);
    }
}
