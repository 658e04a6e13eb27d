/// Buffered bulk writing of output rows through the sink contract.
use anyhow::Result;
use log::debug;

use crate::reducer::BestHitRow;
use crate::store::{BestHitSink, Value};

/// Default number of output rows buffered per bulk write.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Counters the writer hands back once the pass completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub rows: u64,
    pub flushes: u64,
}

/// Buffers output rows and flushes them through the sink in fixed-size
/// batches, bounding peak memory to one batch regardless of pair count.
pub struct BatchWriter<S> {
    sink: S,
    buf: Vec<BestHitRow>,
    batch_size: usize,
    stats: WriterStats,
}

impl<S: BestHitSink> BatchWriter<S> {
    pub fn new(sink: S, batch_size: usize) -> BatchWriter<S> {
        assert!(batch_size > 0, "batch size must be positive");
        BatchWriter {
            sink,
            buf: Vec::with_capacity(batch_size),
            batch_size,
            stats: WriterStats::default(),
        }
    }

    pub fn push(&mut self, row: BestHitRow) -> Result<()> {
        self.buf.push(row);
        if self.buf.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let rows: Vec<Vec<Value>> = self.buf.iter().map(BestHitRow::values).collect();
        self.sink.upsert_batch(&BestHitRow::COLUMNS, &rows)?;
        self.stats.rows += self.buf.len() as u64;
        self.stats.flushes += 1;
        debug!("flushed batch {} ({} rows)", self.stats.flushes, self.buf.len());
        self.buf.clear();
        Ok(())
    }

    /// Flush any buffered remainder and hand the sink back. No trailing
    /// empty flush is issued.
    pub fn finish(mut self) -> Result<(S, WriterStats)> {
        if !self.buf.is_empty() {
            self.flush()?;
        }
        Ok((self.sink, self.stats))
    }
}
