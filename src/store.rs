/// Store contracts the pipeline consumes, plus the shipped implementations:
/// tab-separated tables (optionally gzipped) and an in-memory store.
///
/// Reads and writes go through two separately owned handles. The underlying
/// store's access model forbids interleaving reads and writes on a single
/// cursor, so a reduction pass always holds one source and one sink.
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use flate2::read::MultiGzDecoder;
use indexmap::IndexMap;

use crate::hsp::{Hsp, QueryMeta};

/// One cell of a store row. Null renders as an empty field in text form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Text(String),
    Null,
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Value {
        v.map_or(Value::Null, Value::Text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(v) => f.write_str(v),
            Value::Null => Ok(()),
        }
    }
}

/// Read half of the store: sequential chunked retrieval of the segment
/// stream, already sorted by (db, qseqid, hit, hsp). An empty chunk means
/// the stream is exhausted.
pub trait HspSource {
    fn fetch_chunk(&mut self, max_rows: usize) -> Result<Vec<Hsp>>;
}

/// Write half of the store: bulk insert-or-replace of best-hit rows keyed
/// by (db, qseqid). `columns` names the row shape; every row must match it.
pub trait BestHitSink {
    fn upsert_batch(&mut self, columns: &[&str], rows: &[Vec<Value>]) -> Result<()>;
}

/// Default number of rows pulled from the store per read call.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Adapts a source into a forward-only segment iterator, pulling one chunk
/// of rows at a time to bound read-side memory.
pub struct ChunkedHsps<S> {
    source: S,
    chunk_size: usize,
    buf: std::vec::IntoIter<Hsp>,
    exhausted: bool,
}

impl<S: HspSource> ChunkedHsps<S> {
    pub fn new(source: S, chunk_size: usize) -> ChunkedHsps<S> {
        assert!(chunk_size > 0, "chunk size must be positive");
        ChunkedHsps {
            source,
            chunk_size,
            buf: Vec::new().into_iter(),
            exhausted: false,
        }
    }
}

impl<S: HspSource> Iterator for ChunkedHsps<S> {
    type Item = Result<Hsp>;

    fn next(&mut self) -> Option<Result<Hsp>> {
        loop {
            if let Some(hsp) = self.buf.next() {
                return Some(Ok(hsp));
            }
            if self.exhausted {
                return None;
            }
            match self.source.fetch_chunk(self.chunk_size) {
                Ok(rows) if rows.is_empty() => {
                    self.exhausted = true;
                    return None;
                }
                Ok(rows) => self.buf = rows.into_iter(),
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Column order of the stored segment projection. Rows must arrive sorted
/// ascending by (db, qseqid, hit, hsp); the metadata columns ride along
/// per query.
pub const HSP_COLUMNS: [&str; 20] = [
    "db", "qseqid", "qgene", "qacc", "qlocus", "qtaxon", "qlen", "hit", "hlen", "hsp", //
    "qfrom", "qto", "hfrom", "hto", "alen", "gaps", "ident", "pos", "score", "evalue",
];

/// Segment source over a headered, tab-separated table, gzip-sniffed by
/// file extension.
pub struct TsvHspSource {
    reader: Box<dyn BufRead>,
    line_no: u64,
}

impl fmt::Debug for TsvHspSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsvHspSource")
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

impl TsvHspSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<TsvHspSource> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open HSP table {}", path.display()))?;
        let reader: Box<dyn BufRead> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        TsvHspSource::from_reader(reader)
    }

    pub fn from_reader(mut reader: Box<dyn BufRead>) -> Result<TsvHspSource> {
        let mut header = String::new();
        reader
            .read_line(&mut header)
            .context("failed to read HSP table header")?;
        let names: Vec<&str> = header.trim_end_matches(['\n', '\r']).split('\t').collect();
        if names != HSP_COLUMNS {
            bail!(
                "unexpected HSP table header: got {names:?}, want {:?}",
                HSP_COLUMNS
            );
        }
        Ok(TsvHspSource { reader, line_no: 1 })
    }
}

impl HspSource for TsvHspSource {
    fn fetch_chunk(&mut self, max_rows: usize) -> Result<Vec<Hsp>> {
        let mut rows = Vec::with_capacity(max_rows);
        let mut line = String::new();
        while rows.len() < max_rows {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .with_context(|| format!("HSP table read error after line {}", self.line_no))?;
            if n == 0 {
                break;
            }
            self.line_no += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            let hsp = parse_hsp(trimmed)
                .with_context(|| format!("bad HSP row at line {}", self.line_no))?;
            rows.push(hsp);
        }
        Ok(rows)
    }
}

fn parse_hsp(line: &str) -> Result<Hsp> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != HSP_COLUMNS.len() {
        bail!(
            "expected {} fields, got {}",
            HSP_COLUMNS.len(),
            fields.len()
        );
    }
    Ok(Hsp {
        db: fields[0].to_string(),
        query_id: fields[1].to_string(),
        meta: QueryMeta {
            gene: opt_text(fields[2]),
            acc: fields[3].to_string(),
            locus: opt_text(fields[4]),
            taxon: opt_num(fields[5]).context("qtaxon")?,
            len: num(fields[6]).context("qlen")?,
        },
        hit_num: num(fields[7]).context("hit")?,
        hit_len: num(fields[8]).context("hlen")?,
        hsp_num: num(fields[9]).context("hsp")?,
        query_from: num(fields[10]).context("qfrom")?,
        query_to: num(fields[11]).context("qto")?,
        hit_from: num(fields[12]).context("hfrom")?,
        hit_to: num(fields[13]).context("hto")?,
        align_len: num(fields[14]).context("alen")?,
        gaps: num(fields[15]).context("gaps")?,
        identity: num(fields[16]).context("ident")?,
        positive: num(fields[17]).context("pos")?,
        score: num(fields[18]).context("score")?,
        evalue: opt_num(fields[19]).context("evalue")?,
    })
}

fn opt_text(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn num<T>(field: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    field
        .parse::<T>()
        .map_err(|e| anyhow!("{field:?}: {e}"))
}

fn opt_num<T>(field: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    if field.is_empty() {
        Ok(None)
    } else {
        num(field).map(Some)
    }
}

/// Best-hit sink writing a headered, tab-separated table. The file is
/// truncated on creation; replace semantics hold because one pass emits
/// each (db, qseqid) key exactly once.
pub struct TsvBestHitSink {
    writer: BufWriter<File>,
    wrote_header: bool,
}

impl fmt::Debug for TsvBestHitSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsvBestHitSink")
            .field("wrote_header", &self.wrote_header)
            .finish_non_exhaustive()
    }
}

impl TsvBestHitSink {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<TsvBestHitSink> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create best-hits table {}", path.display()))?;
        Ok(TsvBestHitSink {
            writer: BufWriter::new(file),
            wrote_header: false,
        })
    }

    /// Flush buffered output to disk.
    pub fn finish(mut self) -> Result<()> {
        self.writer
            .flush()
            .context("failed to flush best-hits table")?;
        Ok(())
    }
}

impl BestHitSink for TsvBestHitSink {
    fn upsert_batch(&mut self, columns: &[&str], rows: &[Vec<Value>]) -> Result<()> {
        if !self.wrote_header {
            writeln!(self.writer, "{}", columns.join("\t"))
                .context("failed to write best-hits header")?;
            self.wrote_header = true;
        }
        for row in rows {
            if row.len() != columns.len() {
                bail!(
                    "row width {} does not match {} columns",
                    row.len(),
                    columns.len()
                );
            }
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            writeln!(self.writer, "{}", cells.join("\t"))
                .context("failed to write best-hits row")?;
        }
        Ok(())
    }
}

/// In-memory segment source for tests and small runs. Rows must already be
/// in sort order.
pub struct MemoryHspSource {
    rows: std::vec::IntoIter<Hsp>,
}

impl MemoryHspSource {
    pub fn new(rows: Vec<Hsp>) -> MemoryHspSource {
        MemoryHspSource {
            rows: rows.into_iter(),
        }
    }
}

impl HspSource for MemoryHspSource {
    fn fetch_chunk(&mut self, max_rows: usize) -> Result<Vec<Hsp>> {
        Ok(self.rows.by_ref().take(max_rows).collect())
    }
}

/// In-memory best-hit sink with true insert-or-replace keyed on the first
/// two columns (db, qseqid). Keeps emission order and records the size of
/// every flush it receives.
#[derive(Debug, Default)]
pub struct MemoryBestHitSink {
    rows: IndexMap<(String, String), Vec<Value>>,
    flush_sizes: Vec<usize>,
}

impl MemoryBestHitSink {
    pub fn new() -> MemoryBestHitSink {
        MemoryBestHitSink::default()
    }

    pub fn rows(&self) -> &IndexMap<(String, String), Vec<Value>> {
        &self.rows
    }

    pub fn flush_sizes(&self) -> &[usize] {
        &self.flush_sizes
    }
}

impl BestHitSink for MemoryBestHitSink {
    fn upsert_batch(&mut self, columns: &[&str], rows: &[Vec<Value>]) -> Result<()> {
        self.flush_sizes.push(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                bail!(
                    "row width {} does not match {} columns",
                    row.len(),
                    columns.len()
                );
            }
            let key = match (&row[0], &row[1]) {
                (Value::Text(db), Value::Text(query)) => (db.clone(), query.clone()),
                _ => bail!("best-hit rows must lead with text (db, qseqid) keys"),
            };
            self.rows.insert(key, row.clone());
        }
        Ok(())
    }
}
