/*! Query-side pipeline.

A query is normalized and shingled once ([PreparedQuery]), fanned out
over all live segments (candidate generation + scoring per segment),
and the per-segment rankings are merged into one deterministic global
top-K with matching fragments for the leading documents.
!*/
mod candidates;
mod deadline;
mod fanout;
mod query;
mod response;
mod scorer;

pub use candidates::generate as generate_candidates;
pub use deadline::Deadline;
pub use fanout::search_segments;
pub use fanout::FanoutOutcome;
pub use query::PreparedQuery;
pub use response::decision;
pub use response::originality_pct;
pub use response::DocumentHit;
pub use response::Fragment;
pub use response::HitDetails;
pub use response::SearchResponse;
pub use scorer::matching_fragments;
pub use scorer::score_segment;
pub use scorer::Hit;
pub use scorer::ScoreDetails;
pub use scorer::SegmentHits;
