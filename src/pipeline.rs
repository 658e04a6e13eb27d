/// One reduction pass end to end: sorted segment stream in, best-hit rows
/// out, grouped and scored on the fly.
use anyhow::Result;
use log::info;

use crate::batch::{BatchWriter, DEFAULT_BATCH_SIZE};
use crate::grouper::{pairs, SortCheck};
use crate::hsp::Hsp;
use crate::reducer::Reducer;
use crate::scoring::DEFAULT_PATH_CUTOFF;
use crate::store::{BestHitSink, ChunkedHsps, HspSource, DEFAULT_CHUNK_SIZE};

/// Knobs for one reduction pass.
#[derive(Debug, Clone)]
pub struct ReduceConfig {
    /// Rows pulled from the store per read call.
    pub chunk_size: usize,
    /// Output rows buffered per bulk write.
    pub batch_size: usize,
    /// Largest hit solved by the exact path search.
    pub path_cutoff: usize,
    /// Verify the sorted-input precondition instead of trusting it.
    pub check_sorted: bool,
}

impl Default for ReduceConfig {
    fn default() -> ReduceConfig {
        ReduceConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            path_cutoff: DEFAULT_PATH_CUTOFF,
            check_sorted: false,
        }
    }
}

/// Counters from one reduction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReduceStats {
    pub hsps: u64,
    pub hits: u64,
    pub pairs: u64,
    pub batches: u64,
}

/// Runs one full reduction pass: stream the sorted segments out of
/// `source`, group them into hits and pairs, score every hit under every
/// strategy, and upsert one row per (db, qseqid) pair into `sink`.
///
/// `source` and `sink` are two separate store handles; the store forbids
/// mixing reads and writes on one cursor. Any store failure aborts the
/// pass; batches already flushed stay committed.
pub fn reduce_best_hits<R, W>(source: R, sink: W, config: &ReduceConfig) -> Result<(W, ReduceStats)>
where
    R: HspSource,
    W: BestHitSink,
{
    let reducer = Reducer::new(config.path_cutoff);
    let mut writer = BatchWriter::new(sink, config.batch_size);
    let mut stats = ReduceStats::default();

    let stream = ChunkedHsps::new(source, config.chunk_size);
    if config.check_sorted {
        drive(SortCheck::new(stream), &reducer, &mut writer, &mut stats)?;
    } else {
        drive(stream, &reducer, &mut writer, &mut stats)?;
    }

    let (sink, written) = writer.finish()?;
    stats.batches = written.flushes;
    info!(
        "reduced {} HSPs in {} hits to {} pair rows ({} batches)",
        stats.hsps, stats.hits, stats.pairs, stats.batches
    );
    Ok((sink, stats))
}

fn drive<I, W>(
    stream: I,
    reducer: &Reducer,
    writer: &mut BatchWriter<W>,
    stats: &mut ReduceStats,
) -> Result<()>
where
    I: Iterator<Item = Result<Hsp>>,
    W: BestHitSink,
{
    for pair in pairs(stream) {
        let pair = pair?;
        stats.hsps += pair.hsp_count() as u64;
        stats.hits += pair.hits().len() as u64;
        stats.pairs += 1;
        writer.push(reducer.reduce(&pair))?;
    }
    Ok(())
}
