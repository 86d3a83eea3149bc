/*! Immutable index segments.

A segment is one build's output: sorted posting lists for k=9/k=13, a
doc-id table and per-doc metadata, plus JSON sidecars. Segments are
written once, published atomically, and only ever leave service by being
compacted into a bigger segment or quarantined.
!*/
mod builder;
mod compactor;
pub mod format;
mod reader;

pub use builder::BuildOutcome;
pub use builder::BuiltDoc;
pub use builder::SegmentBuilder;
pub use builder::SkippedDoc;
pub use builder::CODE_NO_SHINGLES;
pub use builder::CODE_TOO_SHORT;
pub use compactor::Compactor;
pub use compactor::CorpusSource;
pub use compactor::SourceStore;
pub use reader::Postings;
pub use reader::SegmentReader;
