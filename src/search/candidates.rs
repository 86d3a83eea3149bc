/*! Candidate generation.

Unions bounded posting lookups (the first `fetch_per_k` query shingles
per k, in token order) and optional LSH bucket hits into a hit counter
per internal id, then truncates to `max_cands_doc` keeping the most-hit
ids. Ties break by internal id ascending, so the candidate set is
deterministic for a given segment and query.
!*/
use std::collections::HashMap;

use crate::config::IndexConfig;
use crate::search::query::PreparedQuery;
use crate::segment::SegmentReader;

/// `(internal_id, hit count)`, ascending by id.
pub fn generate(
    seg: &SegmentReader,
    q: &PreparedQuery,
    cfg: &IndexConfig,
) -> Vec<(u32, u32)> {
    let mut counter: HashMap<u32, u32> = HashMap::new();

    for (k, seq) in [(9usize, &q.s9_seq), (13usize, &q.s13_seq)] {
        let postings = seg.postings(k);
        for h in seq.iter().take(cfg.fetch_per_k) {
            for id in postings.ids_for(*h) {
                *counter.entry(id).or_insert(0) += 1;
            }
        }
    }

    if cfg.minhash.use_lsh {
        if let (Some(lsh), Some(sig)) = (seg.lsh(), &q.signature) {
            for id in lsh.candidates(sig) {
                *counter.entry(id).or_insert(0) += 1;
            }
        }
    }

    let mut cands: Vec<(u32, u32)> = counter.into_iter().collect();
    if cands.len() > cfg.max_cands_doc {
        // keep the most-hit ids, ties by ascending id
        cands.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        cands.truncate(cfg.max_cands_doc);
    }
    cands.sort_by_key(|(id, _)| *id);
    cands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CorpusRecord;
    use crate::segment::SegmentBuilder;

    fn build_segment(
        dir: &std::path::Path,
        cfg: &IndexConfig,
        docs: &[(&str, String)],
    ) -> SegmentReader {
        let records: Vec<CorpusRecord> = docs
            .iter()
            .map(|(id, text)| CorpusRecord {
                doc_id: id.to_string(),
                text: text.clone(),
                title: None,
                author: None,
            })
            .collect();
        let out = dir.join("seg");
        SegmentBuilder::new(cfg).unwrap().build(&records, &out).unwrap();
        SegmentReader::open(&out, 1).unwrap()
    }

    fn numbered(prefix: &str, n: usize) -> String {
        (0..n)
            .map(|i| format!("{}{}", prefix, i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_overlapping_doc_is_candidate() {
        let cfg = IndexConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let shared = numbered("общий", 15);
        let seg = build_segment(
            &dir.path(),
            &cfg,
            &[("hit", shared.clone()), ("miss", numbered("другое", 15))],
        );

        let q = PreparedQuery::prepare(&shared, &cfg).unwrap();
        let cands = generate(&seg, &q, &cfg);
        assert_eq!(cands.len(), 1);
        assert_eq!(seg.doc_id(cands[0].0), "hit");
        // every one of the 7 nine-gram + 3 thirteen-gram lookups hit
        assert_eq!(cands[0].1, 7 + 3);
    }

    #[test]
    fn test_truncation_prefers_hit_count_then_id() {
        let mut cfg = IndexConfig::default();
        cfg.max_cands_doc = 1;
        let dir = tempfile::tempdir().unwrap();
        let strong = numbered("сильный", 20);
        // weak doc shares only the first 9 tokens of the query
        let weak = format!("{} {}", numbered("сильный", 9), numbered("шум", 11));
        let seg = build_segment(&dir.path(), &cfg, &[("weak", weak), ("strong", strong.clone())]);

        let q = PreparedQuery::prepare(&strong, &cfg).unwrap();
        let cands = generate(&seg, &q, &cfg);
        assert_eq!(cands.len(), 1);
        assert_eq!(seg.doc_id(cands[0].0), "strong");
    }

    #[test]
    fn test_fetch_per_k_bounds_lookups() {
        let mut cfg = IndexConfig::default();
        cfg.fetch_per_k = 2;
        let dir = tempfile::tempdir().unwrap();
        let text = numbered("т", 30);
        let seg = build_segment(&dir.path(), &cfg, &[("d", text.clone())]);
        let q = PreparedQuery::prepare(&text, &cfg).unwrap();
        let cands = generate(&seg, &q, &cfg);
        // 2 lookups per k, all hitting the same doc
        assert_eq!(cands, vec![(0, 4)]);
    }
}
