//! Command-line interfaces for both binaries. (spec §6)

use std::path::PathBuf;

use clap::Parser;

use crate::extend::{DEFAULT_FLANK_CHUNK, DEFAULT_MAX_THRESHOLD, DEFAULT_MIN_THRESHOLD};

/// Extends the flanks of STR-spanning reads using a de Bruijn walk anchored
/// in k-mers counted from the bulk sequencing files.
#[derive(Parser, Debug)]
#[command(name = "extend_STR_reads", version)]
pub struct ExtendArgs {
    /// Estimated haploid genome size in bases.
    pub genome_size: f64,

    /// Expected mean sequencing coverage.
    pub coverage: f64,

    /// K-mer length used for counting and extension (odd, 3 <= k < 64).
    pub klen: usize,

    /// FASTQ file of reads annotated with an STR motif interval.
    pub str_reads: PathBuf,

    /// Bulk sequencing FASTQ file(s) used to build the k-mer count table.
    #[arg(required = true)]
    pub reads: Vec<PathBuf>,

    /// Minimum k-mer count to keep after the two-pass filter.
    #[arg(long, default_value_t = DEFAULT_MIN_THRESHOLD)]
    pub min_threshold: u8,

    /// Maximum k-mer count to keep after the two-pass filter.
    #[arg(long, default_value_t = DEFAULT_MAX_THRESHOLD)]
    pub max_threshold: u8,

    /// Print a progress banner every N reads.
    #[arg(long, default_value_t = 1_000_000)]
    pub progress: usize,

    /// Extension cap, in k-mers, per flank walk.
    #[arg(long, default_value_t = DEFAULT_FLANK_CHUNK)]
    pub flanks: usize,

    /// Assumed ploidy.
    #[arg(long, default_value_t = 2)]
    pub ploidy: u32,

    /// Assumed heterozygosity rate.
    #[arg(long, default_value_t = 0.001)]
    pub heterozygosity: f64,

    /// Assumed per-base sequencing error rate.
    #[arg(long, default_value_t = 0.01)]
    pub errorrate: f64,

    /// Emit verbose diagnostic output.
    #[arg(long)]
    pub debug: bool,
}

/// Merges extended STR reads sharing a flank-keyed locus into
/// biallelic-filtered consensus calls.
#[derive(Parser, Debug)]
#[command(name = "merge_STR_reads", version)]
pub struct MergeArgs {
    /// K-mer length used to key flanks for bucketing (odd, 3 <= k < 64).
    pub klen: usize,

    /// FASTQ file of extended STR reads to merge.
    pub str_reads: PathBuf,

    /// Minimum read support for a copy-number allele to be reported.
    #[arg(long, default_value_t = 3)]
    pub min_threshold: u32,

    /// Maximum read support for a copy-number allele to be reported.
    #[arg(long, default_value_t = 10_000)]
    pub max_threshold: u32,

    /// Print a progress banner every N reads.
    #[arg(long, default_value_t = 1_000_000)]
    pub progress: usize,
}
