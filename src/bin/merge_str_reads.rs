use std::process::ExitCode;

use clap::Parser;

use strflank::cli::MergeArgs;
use strflank::error::{StrError, StrResult};
use strflank::fastq::read_all;
use strflank::kmer;
use strflank::merge::{self, Candidate, MergeConfig};
use strflank::str_read::MergeReadName;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn run(args: MergeArgs) -> StrResult<()> {
    let k = kmer::normalize_k(args.klen)?;

    let cfg = MergeConfig {
        k,
        min_threshold: args.min_threshold,
        max_threshold: args.max_threshold,
    };

    eprintln!("reading extended STR reads from {:?}...", args.str_reads);
    let records = read_all(&args.str_reads, false)?;

    let mut parsed = Vec::with_capacity(records.len());
    for (i, rec) in records.iter().enumerate() {
        if args.progress > 0 && i > 0 && i % args.progress == 0 {
            eprintln!("parsed {i} reads");
        }
        parsed.push((MergeReadName::parse(&rec.name)?, rec));
    }

    let candidates: Vec<Candidate> = parsed
        .iter()
        .map(|(name, rec)| Candidate {
            seq: &rec.bases,
            qual: &rec.quals,
            motif: name.fmotif.as_str(),
            zstart: name.fzstart,
            end: name.fend,
            copies: name.fcopies,
        })
        .collect();

    let blocks = merge::merge_reads(&candidates, &cfg)?;
    eprintln!("{} reads folded into {} blocks", candidates.len(), blocks.len());

    let loci = merge::biallelic_loci(&blocks, &cfg);
    for locus in &loci {
        print!("{}", merge::format_locus(locus));
    }

    eprintln!("done: {} biallelic loci emitted", loci.len());
    Ok(())
}

fn main() -> ExitCode {
    let args = MergeArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(StrError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
