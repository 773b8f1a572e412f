use std::process::ExitCode;

use clap::Parser;

use strflank::cli::ExtendArgs;
use strflank::error::{StrError, StrResult};
use strflank::extend::{self, ExtendConfig};
use strflank::fastq::FastqReader;
use strflank::kmer;
use strflank::str_read::ExtendReadName;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn run(args: ExtendArgs) -> StrResult<()> {
    let k = kmer::normalize_k(args.klen)?;

    let cfg = ExtendConfig {
        genome_size: args.genome_size,
        ploidy: args.ploidy,
        heterozygosity: args.heterozygosity,
        coverage: args.coverage,
        error_rate: args.errorrate,
        k,
        min_threshold: args.min_threshold,
        max_threshold: args.max_threshold,
        flank_chunk: args.flanks,
        debug: args.debug,
    };

    if cfg.debug {
        eprintln!(
            "estimated unique k-mers: {:.0}",
            extend::expected_unique_kmers(&cfg)
        );
    }

    eprintln!("building k-mer count table from {} bulk file(s)...", args.reads.len());
    let table = extend::build_counts_parallel(&cfg, &args.reads)?;
    eprintln!("count table built: {} k-mers retained", table.len());

    let mut reader = FastqReader::from_path(&args.str_reads, false)?;

    let mut emitted = 0usize;
    let mut seen = 0usize;
    while let Some(rec) = reader.read_next()? {
        seen += 1;
        if args.progress > 0 && seen % args.progress == 0 {
            eprintln!("processed {seen} STR reads, emitted {emitted}");
        }
        let name = ExtendReadName::parse(&rec.name)?;
        if let Some(extended) = extend::extend_read(&name, &rec.bases, &table, cfg.k, cfg.flank_chunk) {
            print!("{}", extend::format_contig(&extended));
            emitted += 1;
        }
    }

    eprintln!("done: {seen} STR reads processed, {emitted} extended");
    Ok(())
}

fn main() -> ExitCode {
    let args = ExtendArgs::parse();
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
