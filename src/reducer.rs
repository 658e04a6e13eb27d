/// Per-pair reduction: score every hit under every strategy, keep the best
/// hit per strategy, and emit one summary row per (db, qseqid) pair.
use ordered_float::OrderedFloat;

use crate::grouper::{Hit, Pair};
use crate::hsp::{QueryMeta, Score};
use crate::scoring::{MaxScorer, PathScorer, Scorer, SumScorer, DEFAULT_PATH_CUTOFF};
use crate::store::Value;

/// E-value reported for pairs with no usable e-value evidence.
pub const EVALUE_SENTINEL: f64 = 999.0;

/// The winning hit under one strategy: its identity plus its Score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBlock {
    pub hit_num: u32,
    pub hit_len: u64,
    pub score: Score,
}

/// One output row per (db, qseqid) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct BestHitRow {
    pub db: String,
    pub query_id: String,
    pub meta: QueryMeta,
    pub evalue: f64,
    pub path: ScoreBlock,
    pub sum: ScoreBlock,
    pub max: ScoreBlock,
}

impl BestHitRow {
    /// Output column order: pair key, query metadata, e-value, then one
    /// block per strategy prefix (path, sum, max).
    pub const COLUMNS: [&'static str; 32] = [
        "db", "qseqid", "qgene", "qacc", "qlocus", "qtaxon", "qlen", "evalue", //
        "phit", "phlen", "pnhsp", "palen", "pgaps", "pident", "ppos", "pscore", //
        "shit", "shlen", "snhsp", "salen", "sgaps", "sident", "spos", "sscore", //
        "mhit", "mhlen", "mnhsp", "malen", "mgaps", "mident", "mpos", "mscore",
    ];

    /// The row as one store tuple, shaped exactly like [`Self::COLUMNS`].
    pub fn values(&self) -> Vec<Value> {
        let mut row = Vec::with_capacity(Self::COLUMNS.len());
        row.push(Value::Text(self.db.clone()));
        row.push(Value::Text(self.query_id.clone()));
        row.push(Value::from(self.meta.gene.clone()));
        row.push(Value::Text(self.meta.acc.clone()));
        row.push(Value::from(self.meta.locus.clone()));
        row.push(self.meta.taxon.map_or(Value::Null, |t| Value::Int(t as i64)));
        row.push(Value::Int(self.meta.len as i64));
        row.push(Value::Real(self.evalue));
        for block in [&self.path, &self.sum, &self.max] {
            row.push(Value::Int(block.hit_num as i64));
            row.push(Value::Int(block.hit_len as i64));
            row.push(Value::Int(block.score.nhsp as i64));
            row.push(Value::Int(block.score.align_len as i64));
            row.push(Value::Int(block.score.gaps as i64));
            row.push(Value::Int(block.score.identity as i64));
            row.push(Value::Int(block.score.positive as i64));
            row.push(Value::Real(block.score.score));
        }
        row
    }
}

/// Applies all three strategies to a pair's hits and assembles the row.
pub struct Reducer {
    path: PathScorer,
    sum: SumScorer,
    max: MaxScorer,
}

impl Reducer {
    pub fn new(path_cutoff: usize) -> Reducer {
        Reducer {
            path: PathScorer::new(path_cutoff),
            sum: SumScorer,
            max: MaxScorer,
        }
    }

    pub fn reduce(&self, pair: &Pair) -> BestHitRow {
        BestHitRow {
            db: pair.db.clone(),
            query_id: pair.query_id.clone(),
            meta: pair.meta.clone(),
            evalue: min_evalue(pair),
            path: best_block(pair, &self.path),
            sum: best_block(pair, &self.sum),
            max: best_block(pair, &self.max),
        }
    }
}

impl Default for Reducer {
    fn default() -> Reducer {
        Reducer::new(DEFAULT_PATH_CUTOFF)
    }
}

/// Best hit under one strategy. Seeded with the first hit and the zero
/// Score; the comparison is greater-or-equal, so a later hit takes an
/// exact score tie.
fn best_block<S: Scorer>(pair: &Pair, scorer: &S) -> ScoreBlock {
    let hits = pair.hits();
    let mut best_hit: &Hit = &hits[0];
    let mut best = Score::zero();
    for hit in hits {
        let score = scorer.score(hit);
        if score.score >= best.score {
            best_hit = hit;
            best = score;
        }
    }
    ScoreBlock {
        hit_num: best_hit.hit_num,
        hit_len: best_hit.hit_len,
        score: best,
    }
}

/// Minimum e-value over every segment in the pair, never above the
/// sentinel; the sentinel itself when no segment carries one.
fn min_evalue(pair: &Pair) -> f64 {
    pair.hits()
        .iter()
        .flat_map(|hit| hit.hsps())
        .filter_map(|hsp| hsp.evalue)
        .map(OrderedFloat)
        .min()
        .map(|v| v.into_inner())
        .filter(|v| *v < EVALUE_SENTINEL)
        .unwrap_or(EVALUE_SENTINEL)
}
