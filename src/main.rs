use anyhow::Result;
use clap::Parser;

use blastsum::batch::DEFAULT_BATCH_SIZE;
use blastsum::pipeline::{reduce_best_hits, ReduceConfig};
use blastsum::scoring::DEFAULT_PATH_CUTOFF;
use blastsum::store::{TsvBestHitSink, TsvHspSource, DEFAULT_CHUNK_SIZE};

/// blastsum - reduce a sorted alignment-segment table to one best-hit row
/// per (database, query) pair
///
/// Each pair row carries the best hit under three scoring strategies: the
/// maximum-weight non-overlapping path, the straight segment sum, and the
/// single best segment.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Input HSP table (TSV, .gz supported), sorted by db, qseqid, hit, hsp
    #[clap(value_name = "HSP_TABLE")]
    input: String,

    /// Output best-hits table (TSV)
    #[clap(short = 'o', long = "output", value_name = "FILE")]
    output: String,

    /// Rows fetched from the store per read call
    #[clap(long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Output rows buffered per bulk write
    #[clap(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Largest hit solved by the exact path search (exponential above this)
    #[clap(long = "path-cutoff", default_value_t = DEFAULT_PATH_CUTOFF)]
    path_cutoff: usize,

    /// Fail on unsorted input instead of silently mis-grouping
    #[clap(long = "check-sorted")]
    check_sorted: bool,

    /// Quiet mode (warnings and errors only)
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = ReduceConfig {
        chunk_size: args.chunk_size,
        batch_size: args.batch_size,
        path_cutoff: args.path_cutoff,
        check_sorted: args.check_sorted,
    };

    let source = TsvHspSource::open(&args.input)?;
    let sink = TsvBestHitSink::create(&args.output)?;

    let (sink, stats) = reduce_best_hits(source, sink, &config)?;
    sink.finish()?;

    eprintln!(
        "{}: {} HSPs -> {} pair rows ({} hits, {} batches)",
        args.output, stats.hsps, stats.pairs, stats.hits, stats.batches
    );
    Ok(())
}
