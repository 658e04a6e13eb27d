/// Hierarchical grouping of the sorted segment stream: contiguous runs of
/// segments become hits, contiguous runs of hits become pairs.
///
/// Grouping is pure run detection with no lookback, so the input must
/// already be sorted by (db, qseqid, hit, hsp). An out-of-order stream is
/// not detected here; it silently splits what should be one group. Wrap the
/// stream in [`SortCheck`] to turn that into an error instead.
use anyhow::{anyhow, Result};

use crate::hsp::{Hsp, QueryMeta};

/// All segments between one query and one reference sequence in one
/// database. Never empty; hit number and hit length come from the first
/// member.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub hit_num: u32,
    pub hit_len: u64,
    hsps: Vec<Hsp>,
}

impl Hit {
    fn new(first: Hsp) -> Hit {
        Hit {
            hit_num: first.hit_num,
            hit_len: first.hit_len,
            hsps: vec![first],
        }
    }

    /// Build a hit from segments known to share one (db, qseqid, hit) key.
    pub fn from_hsps(hsps: Vec<Hsp>) -> Hit {
        assert!(!hsps.is_empty(), "a hit holds at least one segment");
        debug_assert!(hsps.windows(2).all(|w| w[0].same_hit(&w[1])));
        Hit {
            hit_num: hsps[0].hit_num,
            hit_len: hsps[0].hit_len,
            hsps,
        }
    }

    fn accepts(&self, hsp: &Hsp) -> bool {
        self.hsps[0].same_hit(hsp)
    }

    pub fn hsps(&self) -> &[Hsp] {
        &self.hsps
    }

    pub fn len(&self) -> usize {
        self.hsps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hsps.is_empty()
    }
}

/// All hits between one query and one database. Never empty; the pair key
/// and query metadata come from the first member.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub db: String,
    pub query_id: String,
    pub meta: QueryMeta,
    hits: Vec<Hit>,
}

impl Pair {
    fn new(first: Hit) -> Pair {
        let head = &first.hsps()[0];
        Pair {
            db: head.db.clone(),
            query_id: head.query_id.clone(),
            meta: head.meta.clone(),
            hits: vec![first],
        }
    }

    /// Build a pair from hits known to share one (db, qseqid) key.
    pub fn from_hits(hits: Vec<Hit>) -> Pair {
        assert!(!hits.is_empty(), "a pair holds at least one hit");
        let mut pair = Pair::new(hits[0].clone());
        pair.hits = hits;
        debug_assert!(pair
            .hits
            .iter()
            .all(|h| pair.accepts_key(&h.hsps()[0])));
        pair
    }

    fn accepts_key(&self, hsp: &Hsp) -> bool {
        hsp.db == self.db && hsp.query_id == self.query_id
    }

    fn accepts(&self, hit: &Hit) -> bool {
        self.accepts_key(&hit.hsps()[0])
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn hsp_count(&self) -> usize {
        self.hits.iter().map(Hit::len).sum()
    }
}

/// Groups a sorted segment stream into hits, one contiguous run at a time.
/// Errors from the underlying stream abort the iteration; the partial group
/// in flight is dropped.
pub struct HitStream<I> {
    input: I,
    pending: Option<Hsp>,
    done: bool,
}

impl<I> HitStream<I>
where
    I: Iterator<Item = Result<Hsp>>,
{
    pub fn new(input: I) -> HitStream<I> {
        HitStream {
            input,
            pending: None,
            done: false,
        }
    }
}

impl<I> Iterator for HitStream<I>
where
    I: Iterator<Item = Result<Hsp>>,
{
    type Item = Result<Hit>;

    fn next(&mut self) -> Option<Result<Hit>> {
        if self.done {
            return None;
        }
        let first = match self.pending.take() {
            Some(hsp) => hsp,
            None => match self.input.next() {
                Some(Ok(hsp)) => hsp,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            },
        };
        let mut hit = Hit::new(first);
        loop {
            match self.input.next() {
                Some(Ok(hsp)) => {
                    if hit.accepts(&hsp) {
                        hit.hsps.push(hsp);
                    } else {
                        self.pending = Some(hsp);
                        return Some(Ok(hit));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    // Stream end flushes the open group regardless of size.
                    self.done = true;
                    return Some(Ok(hit));
                }
            }
        }
    }
}

/// Groups a hit stream into pairs, one contiguous run at a time.
pub struct PairStream<I> {
    input: I,
    pending: Option<Hit>,
    done: bool,
}

impl<I> PairStream<I>
where
    I: Iterator<Item = Result<Hit>>,
{
    pub fn new(input: I) -> PairStream<I> {
        PairStream {
            input,
            pending: None,
            done: false,
        }
    }
}

impl<I> Iterator for PairStream<I>
where
    I: Iterator<Item = Result<Hit>>,
{
    type Item = Result<Pair>;

    fn next(&mut self) -> Option<Result<Pair>> {
        if self.done {
            return None;
        }
        let first = match self.pending.take() {
            Some(hit) => hit,
            None => match self.input.next() {
                Some(Ok(hit)) => hit,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            },
        };
        let mut pair = Pair::new(first);
        loop {
            match self.input.next() {
                Some(Ok(hit)) => {
                    if pair.accepts(&hit) {
                        pair.hits.push(hit);
                    } else {
                        self.pending = Some(hit);
                        return Some(Ok(pair));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return Some(Ok(pair));
                }
            }
        }
    }
}

/// Full grouping chain: sorted segments in, pairs out.
pub fn pairs<I>(input: I) -> PairStream<HitStream<I>>
where
    I: Iterator<Item = Result<Hsp>>,
{
    PairStream::new(HitStream::new(input))
}

/// Asserts the sorted-input precondition as the stream is consumed: each
/// segment's (db, qseqid, hit, hsp) key must be >= its predecessor's.
pub struct SortCheck<I> {
    input: I,
    last: Option<(String, String, u32, u32)>,
    done: bool,
}

impl<I> SortCheck<I>
where
    I: Iterator<Item = Result<Hsp>>,
{
    pub fn new(input: I) -> SortCheck<I> {
        SortCheck {
            input,
            last: None,
            done: false,
        }
    }
}

impl<I> Iterator for SortCheck<I>
where
    I: Iterator<Item = Result<Hsp>>,
{
    type Item = Result<Hsp>;

    fn next(&mut self) -> Option<Result<Hsp>> {
        if self.done {
            return None;
        }
        match self.input.next() {
            Some(Ok(hsp)) => {
                if let Some(last) = &self.last {
                    let last_key = (last.0.as_str(), last.1.as_str(), last.2, last.3);
                    if hsp.sort_key() < last_key {
                        self.done = true;
                        return Some(Err(anyhow!(
                            "HSP stream is not sorted: {:?} follows {:?}",
                            hsp.sort_key(),
                            last_key
                        )));
                    }
                }
                self.last = Some((
                    hsp.db.clone(),
                    hsp.query_id.clone(),
                    hsp.hit_num,
                    hsp.hsp_num,
                ));
                Some(Ok(hsp))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsp::QueryMeta;

    fn hsp(db: &str, query: &str, hit_num: u32, hsp_num: u32) -> Hsp {
        Hsp {
            db: db.to_string(),
            query_id: query.to_string(),
            meta: QueryMeta {
                gene: None,
                acc: query.to_string(),
                locus: None,
                taxon: None,
                len: 100,
            },
            hit_num,
            hit_len: 400,
            hsp_num,
            query_from: 1,
            query_to: 50,
            hit_from: 1,
            hit_to: 50,
            align_len: 50,
            gaps: 0,
            identity: 40,
            positive: 45,
            score: 60.0,
            evalue: Some(1e-10),
        }
    }

    fn stream(hsps: Vec<Hsp>) -> impl Iterator<Item = Result<Hsp>> {
        hsps.into_iter().map(Ok)
    }

    #[test]
    fn groups_contiguous_runs() {
        let input = vec![
            hsp("nr", "q1", 1, 1),
            hsp("nr", "q1", 1, 2),
            hsp("nr", "q1", 2, 1),
            hsp("nr", "q2", 1, 1),
            hsp("nt", "q2", 1, 1),
        ];
        let got: Vec<Pair> = pairs(stream(input)).map(|p| p.unwrap()).collect();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].hits().len(), 2);
        assert_eq!(got[0].hits()[0].len(), 2);
        assert_eq!(got[0].hits()[1].len(), 1);
        assert_eq!((got[1].db.as_str(), got[1].query_id.as_str()), ("nr", "q2"));
        assert_eq!((got[2].db.as_str(), got[2].query_id.as_str()), ("nt", "q2"));
    }

    #[test]
    fn empty_stream_yields_no_groups() {
        assert_eq!(pairs(stream(vec![])).count(), 0);
    }

    #[test]
    fn unsorted_stream_splits_groups_silently() {
        // Same hit key, interleaved with another hit: run detection emits
        // three hits where a sorted stream would have two.
        let input = vec![
            hsp("nr", "q1", 1, 1),
            hsp("nr", "q1", 2, 1),
            hsp("nr", "q1", 1, 2),
        ];
        let got: Vec<Hit> = HitStream::new(stream(input)).map(|h| h.unwrap()).collect();
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn sort_check_rejects_out_of_order_keys() {
        let input = vec![
            hsp("nr", "q1", 1, 1),
            hsp("nr", "q1", 2, 1),
            hsp("nr", "q1", 1, 2),
        ];
        let results: Vec<Result<Hsp>> = SortCheck::new(stream(input)).collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].as_ref().unwrap_err().to_string().contains("not sorted"));
    }

    #[test]
    fn sort_check_accepts_duplicate_keys() {
        let input = vec![hsp("nr", "q1", 1, 1), hsp("nr", "q1", 1, 1)];
        assert!(SortCheck::new(stream(input)).all(|r| r.is_ok()));
    }
}
