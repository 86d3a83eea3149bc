/*! Level compaction.

Merges N ready segments of level L into one segment of level L+1 by
re-ingesting the raw source text of every affected document through the
regular builder. Postings carry only k-gram hashes, so text is recovered
from the ingestion system of record behind [SourceStore].

Strict mode: if any document of the batch cannot be re-ingested, the
whole compaction aborts and the inputs stay untouched. Documents are
never silently dropped.
!*/
use std::collections::HashMap;
use std::path::Path;

use itertools::Itertools;
use log::{info, warn};

use crate::config::{EngineConfig, RootPaths, MONOLITH_LEVEL};
use crate::error::Error;
use crate::io::{CorpusReader, CorpusRecord};
use crate::segment::builder::SegmentBuilder;
use crate::store::{Catalog, SegmentRecord};

/// Interface of the external ingestion store: raw UTF-8 text by doc_id.
pub trait SourceStore: Sync {
    fn raw_record(&self, doc_id: &str) -> Result<Option<CorpusRecord>, Error>;
}

/// [SourceStore] over the ingest corpus JSONL. For duplicate doc_ids the
/// last record wins.
pub struct CorpusSource {
    records: HashMap<String, CorpusRecord>,
}

impl CorpusSource {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let mut records = HashMap::new();
        if path.exists() {
            for rec in CorpusReader::from_path(path)? {
                let rec = rec?;
                records.insert(rec.doc_id.clone(), rec);
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SourceStore for CorpusSource {
    fn raw_record(&self, doc_id: &str) -> Result<Option<CorpusRecord>, Error> {
        Ok(self.records.get(doc_id).cloned())
    }
}

pub struct Compactor<'a> {
    cfg: &'a EngineConfig,
    paths: &'a RootPaths,
    catalog: &'a Catalog,
    source: &'a dyn SourceStore,
}

impl<'a> Compactor<'a> {
    pub fn new(
        cfg: &'a EngineConfig,
        paths: &'a RootPaths,
        catalog: &'a Catalog,
        source: &'a dyn SourceStore,
    ) -> Self {
        Self {
            cfg,
            paths,
            catalog,
            source,
        }
    }

    /// Compact `level -> level+1` for one shard, repeating while full
    /// batches are available. Returns the number of documents promoted.
    pub fn compact_level(&self, shard_id: u16, level: u8) -> Result<usize, Error> {
        if level == 0 || level >= self.cfg.max_auto_level {
            return Err(Error::BadInput(format!(
                "level {} not compactable (auto levels are 1..{})",
                level, self.cfg.max_auto_level
            )));
        }
        let per_compact = self.cfg.segments_per_compact(level);
        let mut total_docs = 0;

        loop {
            let batch = self.catalog.lock_for_compaction(shard_id, level, per_compact)?;
            if batch.is_empty() {
                break;
            }
            let ids: Vec<u64> = batch.iter().map(|s| s.segment_id).collect();
            match self.compact_batch(shard_id, level + 1, &batch) {
                Ok(n) => total_docs += n,
                Err(e) => {
                    self.catalog.unreserve(&ids);
                    return Err(e);
                }
            }
        }
        if total_docs > 0 {
            info!(
                "[COMPACT L{}->L{}] shard {}: promoted {} docs",
                level,
                level + 1,
                shard_id,
                total_docs
            );
        }
        Ok(total_docs)
    }

    /// Bulk rebuild: every live document of the shard goes into a single
    /// monolith segment; all previously ready segments are retired.
    pub fn rebuild_monolith(&self, shard_id: u16) -> Result<usize, Error> {
        let inputs = self.catalog.list_ready(shard_id, None);
        let doc_ids = self.catalog.live_doc_ids(shard_id);
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let input_ids: Vec<u64> = inputs.iter().map(|s| s.segment_id).collect();
        let n = self.rebuild_into(shard_id, MONOLITH_LEVEL, doc_ids, &input_ids)?;
        info!("[MONOLITH] shard {}: rebuilt {} docs", shard_id, n);
        Ok(n)
    }

    fn compact_batch(
        &self,
        shard_id: u16,
        to_level: u8,
        inputs: &[SegmentRecord],
    ) -> Result<usize, Error> {
        let input_ids: Vec<u64> = inputs.iter().map(|s| s.segment_id).collect();
        let doc_ids = self.catalog.docs_in_segments(&input_ids);

        if doc_ids.is_empty() {
            // inputs hold nothing; retire them without building anything
            warn!(
                "[COMPACT] shard {}: segments {:?} have no linked docs, retiring",
                shard_id, input_ids
            );
            for id in &input_ids {
                self.catalog.retire(*id)?;
            }
            return Ok(0);
        }
        self.rebuild_into(shard_id, to_level, doc_ids, &input_ids)
    }

    fn rebuild_into(
        &self,
        shard_id: u16,
        to_level: u8,
        doc_ids: Vec<String>,
        input_ids: &[u64],
    ) -> Result<usize, Error> {
        // strict mode: recover every source text before building
        let mut records = Vec::with_capacity(doc_ids.len());
        for doc_id in &doc_ids {
            match self.source.raw_record(doc_id)? {
                Some(rec) => records.push(rec),
                None => {
                    self.catalog.log_index_error(
                        "compact",
                        Some("MISSING_SOURCE"),
                        &format!("source text missing for {}", doc_id),
                        Some(doc_id),
                        None,
                    );
                    return Err(Error::MissingSource(doc_id.clone()));
                }
            }
        }

        let new_seg = self.catalog.allocate(shard_id, to_level)?;
        let out_dir = self.paths.segment_dir(shard_id, new_seg.segment_id);

        let builder = SegmentBuilder::new(&self.cfg.index)?;
        let outcome = match builder.build(&records, &out_dir) {
            Ok(o) => o,
            Err(e) => {
                self.catalog
                    .mark_segment_error(new_seg.segment_id, "compact", &e.task_message());
                return Err(e);
            }
        };

        // a previously indexed doc that no longer builds means the batch
        // cannot be conserved; abort rather than lose it
        if outcome.accepted.len() != doc_ids.len() {
            let dropped = outcome
                .skipped
                .iter()
                .map(|s| s.doc_id.as_str())
                .join(", ");
            let msg = format!("compaction would drop docs [{}]", dropped);
            self.catalog
                .mark_segment_error(new_seg.segment_id, "compact", &msg);
            let _ = std::fs::remove_dir_all(&out_dir);
            return Err(Error::MissingSource(msg));
        }

        self.catalog.apply_compaction(
            new_seg.segment_id,
            &outcome.stats,
            &outcome.accepted,
            input_ids,
        )?;
        Ok(outcome.accepted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::store::SegmentStatus;

    struct MapSource(HashMap<String, CorpusRecord>);

    impl SourceStore for MapSource {
        fn raw_record(&self, doc_id: &str) -> Result<Option<CorpusRecord>, Error> {
            Ok(self.0.get(doc_id).cloned())
        }
    }

    fn text(seed: usize) -> String {
        (0..20)
            .map(|i| format!("tok{}", seed * 100 + i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn setup(n_docs: usize, docs_per_seg: usize) -> (tempfile::TempDir, EngineConfig, RootPaths, Catalog, MapSource) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::default();
        let paths = RootPaths::new(dir.path());
        let catalog = Catalog::open(&paths).unwrap();
        let mut source = HashMap::new();

        let index_config = IndexConfig::default();
        let builder = SegmentBuilder::new(&index_config).unwrap();
        let mut pending: Vec<CorpusRecord> = Vec::new();
        for i in 0..n_docs {
            let rec = CorpusRecord {
                doc_id: format!("doc{:02}", i),
                text: text(i),
                title: None,
                author: None,
            };
            catalog.register_document(&rec.doc_id, 0, None, None).unwrap();
            source.insert(rec.doc_id.clone(), rec.clone());
            pending.push(rec);
            if pending.len() == docs_per_seg || i == n_docs - 1 {
                let seg = catalog.allocate(0, 1).unwrap();
                let out = paths.segment_dir(0, seg.segment_id);
                let outcome = builder.build(&pending, &out).unwrap();
                catalog
                    .apply_build(seg.segment_id, &outcome.stats, &outcome.accepted)
                    .unwrap();
                pending.clear();
            }
        }
        (dir, cfg, paths, catalog, MapSource(source))
    }

    #[test]
    fn test_compaction_conserves_docs() {
        let (_d, mut cfg, paths, catalog, source) = setup(10, 4);
        cfg.segments_per_l2 = 3;
        assert_eq!(catalog.list_ready(0, Some(&[1])).len(), 3);

        let compactor = Compactor::new(&cfg, &paths, &catalog, &source);
        let promoted = compactor.compact_level(0, 1).unwrap();
        assert_eq!(promoted, 10);

        let ready = catalog.list_ready(0, None);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].level, 2);
        assert_eq!(ready[0].doc_count, 10);
        assert_eq!(catalog.docs_in_segments(&[ready[0].segment_id]).len(), 10);
    }

    #[test]
    fn test_missing_source_aborts_whole_compaction() {
        let (_d, mut cfg, paths, catalog, mut source) = setup(10, 4);
        cfg.segments_per_l2 = 3;
        source.0.remove("doc03");

        let before = catalog.list_ready(0, None);
        let compactor = Compactor::new(&cfg, &paths, &catalog, &source);
        let err = compactor.compact_level(0, 1).unwrap_err();
        assert!(matches!(err, Error::MissingSource(_)));

        // inputs untouched, still ready, reservation released
        let after = catalog.list_ready(0, None);
        assert_eq!(
            before.iter().map(|s| s.segment_id).collect::<Vec<_>>(),
            after.iter().map(|s| s.segment_id).collect::<Vec<_>>()
        );
        assert!(after.iter().all(|s| s.status == SegmentStatus::Ready));
        assert!(!catalog
            .lock_for_compaction(0, 1, 3)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_no_batch_below_fanin() {
        let (_d, cfg, paths, catalog, source) = setup(10, 4);
        // default fan-in is 10 segments; only 3 exist
        let compactor = Compactor::new(&cfg, &paths, &catalog, &source);
        assert_eq!(compactor.compact_level(0, 1).unwrap(), 0);
        assert_eq!(catalog.list_ready(0, Some(&[1])).len(), 3);
    }

    #[test]
    fn test_monolith_rebuild_retires_everything() {
        let (_d, cfg, paths, catalog, source) = setup(6, 2);
        let compactor = Compactor::new(&cfg, &paths, &catalog, &source);
        let n = compactor.rebuild_monolith(0).unwrap();
        assert_eq!(n, 6);
        let ready = catalog.list_ready(0, None);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].level, MONOLITH_LEVEL);
        assert_eq!(ready[0].doc_count, 6);
    }

    #[test]
    fn test_level_bounds() {
        let (_d, cfg, paths, catalog, source) = setup(2, 2);
        let compactor = Compactor::new(&cfg, &paths, &catalog, &source);
        assert!(compactor.compact_level(0, 0).is_err());
        assert!(compactor.compact_level(0, cfg.max_auto_level).is_err());
    }
}
