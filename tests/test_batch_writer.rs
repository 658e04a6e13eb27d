// Tests for batched bulk writing and the in-memory sink's replace semantics
use blastsum::batch::BatchWriter;
use blastsum::hsp::{QueryMeta, Score};
use blastsum::reducer::{BestHitRow, ScoreBlock};
use blastsum::store::{BestHitSink, MemoryBestHitSink, Value};

fn row(query_id: &str) -> BestHitRow {
    let block = ScoreBlock {
        hit_num: 1,
        hit_len: 300,
        score: Score {
            nhsp: 1,
            align_len: 50,
            gaps: 0,
            identity: 40,
            positive: 45,
            score: 60.0,
        },
    };
    BestHitRow {
        db: "nr".to_string(),
        query_id: query_id.to_string(),
        meta: QueryMeta {
            gene: None,
            acc: query_id.to_string(),
            locus: None,
            taxon: None,
            len: 100,
        },
        evalue: 1e-6,
        path: block,
        sum: block,
        max: block,
    }
}

#[test]
fn flushes_in_fixed_batches_with_a_short_tail() {
    let mut writer = BatchWriter::new(MemoryBestHitSink::new(), 1000);
    for i in 0..2500 {
        writer.push(row(&format!("q{i}"))).unwrap();
    }
    let (sink, stats) = writer.finish().unwrap();

    assert_eq!(sink.flush_sizes(), &[1000, 1000, 500]);
    assert_eq!(stats.rows, 2500);
    assert_eq!(stats.flushes, 3);
    assert_eq!(sink.rows().len(), 2500);
}

#[test]
fn exact_multiple_of_batch_size_has_no_trailing_flush() {
    let mut writer = BatchWriter::new(MemoryBestHitSink::new(), 1000);
    for i in 0..2000 {
        writer.push(row(&format!("q{i}"))).unwrap();
    }
    let (sink, stats) = writer.finish().unwrap();

    assert_eq!(sink.flush_sizes(), &[1000, 1000]);
    assert_eq!(stats.flushes, 2);
}

#[test]
fn short_run_flushes_once_at_finish() {
    let mut writer = BatchWriter::new(MemoryBestHitSink::new(), 1000);
    for i in 0..10 {
        writer.push(row(&format!("q{i}"))).unwrap();
    }
    let (sink, _) = writer.finish().unwrap();

    assert_eq!(sink.flush_sizes(), &[10]);
}

#[test]
fn empty_run_never_flushes() {
    let writer = BatchWriter::new(MemoryBestHitSink::new(), 1000);
    let (sink, stats) = writer.finish().unwrap();

    assert!(sink.flush_sizes().is_empty());
    assert_eq!(stats.rows, 0);
}

#[test]
fn memory_sink_replaces_rows_by_pair_key() {
    let mut sink = MemoryBestHitSink::new();
    let first = row("q1");
    let mut second = row("q1");
    second.evalue = 1e-30;

    sink.upsert_batch(&BestHitRow::COLUMNS, &[first.values()])
        .unwrap();
    sink.upsert_batch(&BestHitRow::COLUMNS, &[second.values()])
        .unwrap();

    assert_eq!(sink.rows().len(), 1, "same (db, qseqid) key replaces");
    let stored = &sink.rows()[&("nr".to_string(), "q1".to_string())];
    assert_eq!(stored[7], Value::Real(1e-30));
}

#[test]
fn sink_rejects_rows_that_do_not_match_the_columns() {
    let mut sink = MemoryBestHitSink::new();
    let err = sink
        .upsert_batch(&BestHitRow::COLUMNS, &[vec![Value::Int(1)]])
        .unwrap_err();
    assert!(err.to_string().contains("does not match"));
}
