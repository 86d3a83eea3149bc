/*! Candidate scoring.

For each candidate and each k: Jaccard `J = inter / (qS + tS - inter)`
and containment `C = inter / qS` over the shingle sets, mixed as
`s_k = w_k * (alpha*J + (1-alpha)*C)`, combined as `max(s9, s13)`, with
a SimHash proximity bonus for already-suspicious candidates.

Intersections are computed lazily: one walk over the query's shingle
sets, bumping per-candidate counters from the posting lists. The hot
path has no fallible sub-calls; an expired deadline just truncates.
!*/
use std::collections::HashMap;

use crate::config::IndexConfig;
use crate::search::candidates;
use crate::search::deadline::Deadline;
use crate::search::query::PreparedQuery;
use crate::search::response::Fragment;
use crate::segment::SegmentReader;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDetails {
    pub j9: f64,
    pub c9: f64,
    pub j13: f64,
    pub c13: f64,
    pub inter9: u32,
    pub inter13: u32,
    pub cand_hits: u32,
    pub hamming_simhash: u32,
    pub minhash_sim_est: f64,
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub internal_id: u32,
    pub doc_id: String,
    pub segment_id: u64,
    pub score: f64,
    pub details: ScoreDetails,
}

/// One segment's scored hits. `hits_total` counts everything that
/// survived the prune, before top-K truncation.
#[derive(Debug, Default)]
pub struct SegmentHits {
    pub segment_id: u64,
    pub hits: Vec<Hit>,
    pub hits_total: usize,
    pub truncated: bool,
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

fn round3(x: f64) -> f64 {
    (x * 1e3).round() / 1e3
}

fn jaccard_containment(inter: u32, q_size: usize, t_size: usize) -> (f64, f64) {
    if q_size == 0 {
        return (0.0, 0.0);
    }
    let mut union = q_size as f64 + t_size as f64 - inter as f64;
    if union <= 0.0 {
        union = 1.0;
    }
    (inter as f64 / union, inter as f64 / q_size as f64)
}

/// inter_k per candidate: for each query shingle, walk its posting list
/// and count candidates. `cand_ids` must be sorted.
fn intersections(
    seg: &SegmentReader,
    k: usize,
    q_set: &[u64],
    cand_ids: &[u32],
) -> HashMap<u32, u32> {
    let mut inter: HashMap<u32, u32> = HashMap::new();
    let postings = seg.postings(k);
    for &h in q_set {
        for id in postings.ids_for(h) {
            if cand_ids.binary_search(&id).is_ok() {
                *inter.entry(id).or_insert(0) += 1;
            }
        }
    }
    inter
}

/// Candidate generation + scoring for one segment.
pub fn score_segment(
    seg: &SegmentReader,
    q: &PreparedQuery,
    cfg: &IndexConfig,
    top: usize,
    deadline: &Deadline,
) -> SegmentHits {
    let mut out = SegmentHits {
        segment_id: seg.segment_id(),
        ..SegmentHits::default()
    };

    let cands = candidates::generate(seg, q, cfg);
    if cands.is_empty() || deadline.expired() {
        out.truncated = deadline.expired();
        return out;
    }

    let cand_ids: Vec<u32> = cands.iter().map(|(id, _)| *id).collect();
    let inter9_map = intersections(seg, 9, &q.s9_set, &cand_ids);
    let inter13_map = intersections(seg, 13, &q.s13_set, &cand_ids);

    let q_s9 = q.window_count(9);
    let q_s13 = q.window_count(13);
    let min_inter9: u32 = if q_s9 <= 8 { 1 } else { 2 };
    let min_inter13: u32 = 1;

    let w = &cfg.weights;
    let thr = &cfg.thresholds;
    let use_mh_est = cfg.minhash.use_minhash_est && q.signature.is_some();

    let mut hits = Vec::new();
    for (id, cand_hits) in cands {
        // candidate boundary is the only cancellation point
        if deadline.expired() {
            out.truncated = true;
            break;
        }

        let tok_len = seg.tok_len(id) as usize;
        if tok_len < cfg.w_min_doc {
            continue;
        }
        let inter9 = inter9_map.get(&id).copied().unwrap_or(0);
        let inter13 = inter13_map.get(&id).copied().unwrap_or(0);
        if inter9 < min_inter9 && inter13 < min_inter13 {
            continue;
        }

        let t_s9 = tok_len.saturating_sub(9 - 1);
        let t_s13 = tok_len.saturating_sub(13 - 1);
        let (j9, c9) = jaccard_containment(inter9, q_s9, t_s9);
        let (j13, c13) = jaccard_containment(inter13, q_s13, t_s13);

        let s9 = w.w9 * (w.alpha * j9 + (1.0 - w.alpha) * c9);
        let s13 = w.w13 * (w.alpha * j13 + (1.0 - w.alpha) * c13);
        let mut score = s9.max(s13);

        // SimHash bonus only for already-suspicious candidates
        let mut hamming = 128u32;
        if cfg.simhash_bonus > 0.0 && score >= thr.partial_thr {
            hamming = q.simhash.hamming(&seg.simhash(id));
            if hamming <= cfg.hamming_bonus_bits {
                score += cfg.simhash_bonus;
            }
        }

        let mut mh_est = 0.0;
        if use_mh_est {
            if let (Some(q_sig), Some(d_sig)) = (&q.signature, seg.signature(id)) {
                let eq = q_sig.iter().zip(&d_sig).filter(|(a, b)| a == b).count();
                mh_est = round3(eq as f64 / q_sig.len() as f64);
            }
        }

        hits.push(Hit {
            internal_id: id,
            doc_id: seg.doc_id(id).to_string(),
            segment_id: seg.segment_id(),
            score: round6(score),
            details: ScoreDetails {
                j9: round6(j9),
                c9: round6(c9),
                j13: round6(j13),
                c13: round6(c13),
                inter9,
                inter13,
                cand_hits,
                hamming_simhash: hamming,
                minhash_sim_est: mh_est,
            },
        });
    }

    sort_hits(&mut hits);
    out.hits_total = hits.len();
    hits.truncate(top);
    out.hits = hits;
    out
}

/// Deterministic ranking: score desc, then inter13 desc, then doc_id
/// ascending.
pub fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(b.details.inter13.cmp(&a.details.inter13))
            .then(a.doc_id.cmp(&b.doc_id))
    });
}

fn merge_intervals(mut intervals: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    intervals.sort_unstable();
    let mut out: Vec<(usize, usize)> = Vec::with_capacity(intervals.len());
    for (s, e) in intervals {
        match out.last_mut() {
            // merge when the next interval starts inside (or at the edge
            // of) the previous one
            Some(last) if s <= last.1 => last.1 = last.1.max(e),
            _ => out.push((s, e)),
        }
    }
    out
}

/// Matched query intervals for one document, as merged `[pos, pos+k)`
/// windows materialized over the query tokens. Computed only for the
/// top-ranked documents.
pub fn matching_fragments(seg: &SegmentReader, q: &PreparedQuery, internal_id: u32) -> Vec<Fragment> {
    let mut intervals: Vec<(usize, usize)> = Vec::new();

    for (k, pos_map) in [(13usize, &q.pos13), (9usize, &q.pos9)] {
        let postings = seg.postings(k);
        for (h, starts) in pos_map {
            if postings.contains(*h, internal_id) {
                for s in starts {
                    intervals.push((*s, *s + k));
                }
            }
        }
    }

    merge_intervals(intervals)
        .into_iter()
        .map(|(start, end)| Fragment {
            start,
            end,
            text: q.tokens[start..end.min(q.tokens.len())].join(" "),
        })
        .collect()
}
