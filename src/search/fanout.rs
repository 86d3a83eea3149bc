/*! Segment search fanout.

Runs candidate generation + scoring concurrently over every live segment
of a shard and merges the per-segment top-K lists into one global
ranking. Merging is deterministic: score descending, then inter13
descending, then doc_id ascending.
!*/
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::IndexConfig;
use crate::search::deadline::Deadline;
use crate::search::query::PreparedQuery;
use crate::search::scorer::{self, Hit, SegmentHits};
use crate::segment::SegmentReader;

#[derive(Debug, Default)]
pub struct FanoutOutcome {
    pub hits: Vec<Hit>,
    pub hits_total: usize,
    pub truncated: bool,
}

/// Score all segments concurrently, then merge and truncate to
/// `final_top`.
pub fn search_segments(
    segments: &[Arc<SegmentReader>],
    q: &PreparedQuery,
    cfg: &IndexConfig,
    final_top: usize,
    deadline: &Deadline,
) -> FanoutOutcome {
    let per_segment: Vec<SegmentHits> = segments
        .par_iter()
        .map(|seg| scorer::score_segment(seg, q, cfg, final_top, deadline))
        .collect();

    let mut out = FanoutOutcome::default();
    let mut hits = Vec::new();
    for seg_hits in per_segment {
        out.hits_total += seg_hits.hits_total;
        out.truncated |= seg_hits.truncated;
        hits.extend(seg_hits.hits);
    }
    scorer::sort_hits(&mut hits);
    hits.truncate(final_top);
    out.hits = hits;
    out
}
