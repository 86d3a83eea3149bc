/*! Segment and document catalog.

The only mutable shared structure in the engine. All transitions happen
under one mutex and are committed as a durable JSON snapshot (temp +
fsync + rename) before the lock is released, together with the affected
shard manifest. Publication bumps a generation counter with release
ordering; search snapshots re-load on an acquire read of it.

State machines enforced here:

- segment: `building → (ready | error)`, `ready → merged`, `error`
  terminal;
- document: status advances monotonically, except through the retryable
  `error` state.
!*/
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::RootPaths;
use crate::error::Error;
use crate::io::write_json_atomic;
use crate::segment::format::SegmentStats;
use crate::segment::BuiltDoc;
use crate::store::manifest::write_manifest;
use crate::store::types::{
    now_secs, DocStatus, DocumentRecord, IndexErrorRecord, SegmentDocRow, SegmentRecord,
    SegmentStatus,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    next_segment_id: u64,
    documents: BTreeMap<String, DocumentRecord>,
    segments: BTreeMap<u64, SegmentRecord>,
    /// Link rows for building/ready segments only.
    segment_docs: Vec<SegmentDocRow>,
    errors: Vec<IndexErrorRecord>,
}

pub struct Catalog {
    paths: RootPaths,
    path: PathBuf,
    state: Mutex<CatalogState>,
    generation: AtomicU64,
}

impl Catalog {
    pub fn open(paths: &RootPaths) -> Result<Self, Error> {
        paths.ensure()?;
        let path = paths.catalog_path();
        let state = if path.exists() {
            serde_json::from_slice(&std::fs::read(&path)?)?
        } else {
            CatalogState {
                next_segment_id: 1,
                ..CatalogState::default()
            }
        };
        Ok(Self {
            paths: paths.clone(),
            path,
            state: Mutex::new(state),
            generation: AtomicU64::new(1),
        })
    }

    /// Monotonic publication counter; search snapshots key off it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CatalogState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Persist the snapshot and, if a shard's ready set may have changed,
    /// its manifest. Called with the state lock held.
    fn commit(&self, st: &CatalogState, shard_touched: Option<u16>) -> Result<(), Error> {
        write_json_atomic(&self.path, st)?;
        let gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(shard_id) = shard_touched {
            let mut ready: Vec<&SegmentRecord> = st
                .segments
                .values()
                .filter(|s| s.shard_id == shard_id && s.status == SegmentStatus::Ready)
                .collect();
            ready.sort_by_key(|s| (s.level, s.segment_id));
            write_manifest(&self.paths, shard_id, gen, &ready)?;
        }
        Ok(())
    }

    // ── segment store ops ──────────────────────────────────────────────

    /// Monotonic, durable segment id allocation; creates the `building`
    /// row.
    pub fn allocate(&self, shard_id: u16, level: u8) -> Result<SegmentRecord, Error> {
        let mut st = self.lock();
        let segment_id = st.next_segment_id;
        st.next_segment_id += 1;
        let rec = SegmentRecord {
            segment_id,
            shard_id,
            level,
            status: SegmentStatus::Building,
            path: format!("shard_{}/segment_{}", shard_id, segment_id),
            doc_count: 0,
            shingle_count: 0,
            size_bytes: 0,
            checksum_bin: String::new(),
            created_at: now_secs(),
            last_compacted_at: None,
            reserved: false,
        };
        st.segments.insert(segment_id, rec.clone());
        self.commit(&st, None)?;
        Ok(rec)
    }

    fn fill_stats(rec: &mut SegmentRecord, stats: &SegmentStats) {
        rec.doc_count = stats.n_docs;
        rec.shingle_count = stats.k9 + stats.k13;
        rec.size_bytes = stats.size_bytes;
        rec.checksum_bin = stats.checksum_bin.clone();
    }

    /// Atomic `building → ready`. Double publish is rejected, which makes
    /// build and compaction retries safe.
    pub fn publish(&self, segment_id: u64, stats: &SegmentStats) -> Result<(), Error> {
        let mut st = self.lock();
        let rec = st
            .segments
            .get_mut(&segment_id)
            .ok_or_else(|| Error::Custom(format!("unknown segment {}", segment_id)))?;
        if rec.status != SegmentStatus::Building {
            return Err(Error::Custom(format!(
                "segment {} is {:?}, cannot publish",
                segment_id, rec.status
            )));
        }
        Self::fill_stats(rec, stats);
        rec.status = SegmentStatus::Ready;
        let shard_id = rec.shard_id;
        self.commit(&st, Some(shard_id))?;
        info!("[STORE] segment {} published (shard {})", segment_id, shard_id);
        Ok(())
    }

    /// Quarantine: `building|ready → error`, with an index_error row.
    pub fn mark_segment_error(&self, segment_id: u64, stage: &str, message: &str) {
        let mut st = self.lock();
        let shard = match st.segments.get_mut(&segment_id) {
            Some(rec) if rec.status != SegmentStatus::Merged => {
                rec.status = SegmentStatus::Error;
                rec.reserved = false;
                Some(rec.shard_id)
            }
            _ => None,
        };
        let mut msg = message.to_string();
        msg.truncate(2000);
        st.errors.push(IndexErrorRecord {
            stage: stage.to_string(),
            code: None,
            message: msg,
            doc_id: None,
            segment_id: Some(segment_id),
            created_at: now_secs(),
        });
        if let Err(e) = self.commit(&st, shard) {
            warn!("catalog commit failed while quarantining {}: {}", segment_id, e);
        }
    }

    /// Ready segments of a shard, ordered by (level, id). `levels`
    /// restricts the result when given.
    pub fn list_ready(&self, shard_id: u16, levels: Option<&[u8]>) -> Vec<SegmentRecord> {
        let st = self.lock();
        let mut out: Vec<SegmentRecord> = st
            .segments
            .values()
            .filter(|s| {
                s.shard_id == shard_id
                    && s.status == SegmentStatus::Ready
                    && levels.map_or(true, |ls| ls.contains(&s.level))
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.level, s.segment_id));
        out
    }

    /// `ready → merged`; refused while any document still points at the
    /// segment.
    pub fn retire(&self, segment_id: u64) -> Result<(), Error> {
        let mut st = self.lock();
        let still_linked = st
            .documents
            .values()
            .any(|d| d.current_segment_id == Some(segment_id));
        if still_linked {
            return Err(Error::Custom(format!(
                "segment {} still holds live documents",
                segment_id
            )));
        }
        let rec = st
            .segments
            .get_mut(&segment_id)
            .ok_or_else(|| Error::Custom(format!("unknown segment {}", segment_id)))?;
        if rec.status != SegmentStatus::Ready {
            return Err(Error::Custom(format!(
                "segment {} is {:?}, cannot retire",
                segment_id, rec.status
            )));
        }
        rec.status = SegmentStatus::Merged;
        rec.reserved = false;
        rec.last_compacted_at = Some(now_secs());
        let shard_id = rec.shard_id;
        st.segment_docs.retain(|r| r.segment_id != segment_id);
        self.commit(&st, Some(shard_id))?;
        Ok(())
    }

    /// Atomically reserve the `n` oldest eligible ready segments of a
    /// level. Rows already reserved by a concurrent compactor are
    /// skipped; fewer than `n` eligible rows reserves nothing.
    pub fn lock_for_compaction(
        &self,
        shard_id: u16,
        level: u8,
        n: usize,
    ) -> Result<Vec<SegmentRecord>, Error> {
        let mut st = self.lock();
        let mut ids: Vec<u64> = st
            .segments
            .values()
            .filter(|s| {
                s.shard_id == shard_id
                    && s.level == level
                    && s.status == SegmentStatus::Ready
                    && !s.reserved
            })
            .map(|s| s.segment_id)
            .collect();
        ids.sort_unstable();
        if ids.len() < n {
            return Ok(Vec::new());
        }
        ids.truncate(n);
        let mut out = Vec::with_capacity(n);
        for id in &ids {
            if let Some(rec) = st.segments.get_mut(id) {
                rec.reserved = true;
                out.push(rec.clone());
            }
        }
        self.commit(&st, None)?;
        Ok(out)
    }

    pub fn unreserve(&self, segment_ids: &[u64]) {
        let mut st = self.lock();
        for id in segment_ids {
            if let Some(rec) = st.segments.get_mut(id) {
                rec.reserved = false;
            }
        }
        if let Err(e) = self.commit(&st, None) {
            warn!("catalog commit failed while unreserving: {}", e);
        }
    }

    pub fn segment(&self, segment_id: u64) -> Option<SegmentRecord> {
        self.lock().segments.get(&segment_id).cloned()
    }

    /// Building + ready segments of a shard (back-pressure signal).
    pub fn count_unretired(&self, shard_id: u16) -> usize {
        self.lock()
            .segments
            .values()
            .filter(|s| {
                s.shard_id == shard_id
                    && matches!(s.status, SegmentStatus::Building | SegmentStatus::Ready)
            })
            .count()
    }

    // ── document ops ───────────────────────────────────────────────────

    /// Ingest entry point: create or refresh the catalog row. New docs
    /// start `uploaded`.
    pub fn register_document(
        &self,
        doc_id: &str,
        shard_id: u16,
        title: Option<&str>,
        author: Option<&str>,
    ) -> Result<(), Error> {
        let mut st = self.lock();
        let now = now_secs();
        st.documents
            .entry(doc_id.to_string())
            .and_modify(|d| {
                d.updated_at = now;
                if d.title.is_none() {
                    d.title = title.map(str::to_string);
                }
                if d.author.is_none() {
                    d.author = author.map(str::to_string);
                }
            })
            .or_insert_with(|| DocumentRecord {
                doc_id: doc_id.to_string(),
                shard_id,
                status: DocStatus::Uploaded,
                current_segment_id: None,
                simhash_hi: 0,
                simhash_lo: 0,
                tok_len: 0,
                title: title.map(str::to_string),
                author: author.map(str::to_string),
                created_at: now,
                updated_at: now,
            });
        self.commit(&st, None)
    }

    pub fn mark_document_status(&self, doc_id: &str, status: DocStatus) -> Result<(), Error> {
        let mut st = self.lock();
        let doc = st
            .documents
            .get_mut(doc_id)
            .ok_or_else(|| Error::Custom(format!("unknown document {}", doc_id)))?;
        if !doc.status.can_advance_to(status) {
            return Err(Error::Custom(format!(
                "document {} cannot move {:?} -> {:?}",
                doc_id, doc.status, status
            )));
        }
        doc.status = status;
        doc.updated_at = now_secs();
        self.commit(&st, None)
    }

    pub fn document(&self, doc_id: &str) -> Option<DocumentRecord> {
        self.lock().documents.get(doc_id).cloned()
    }

    /// Normalized documents of a shard not yet placed in any segment,
    /// ordered by doc_id.
    pub fn documents_for_l1(&self, shard_id: u16, limit: usize) -> Vec<String> {
        let st = self.lock();
        st.documents
            .values()
            .filter(|d| {
                d.shard_id == shard_id
                    && d.status == DocStatus::Normalized
                    && d.current_segment_id.is_none()
            })
            .map(|d| d.doc_id.clone())
            .take(limit)
            .collect()
    }

    /// Union of documents linked to the given segments, sorted.
    pub fn docs_in_segments(&self, segment_ids: &[u64]) -> Vec<String> {
        let st = self.lock();
        let mut out: Vec<String> = st
            .segment_docs
            .iter()
            .filter(|r| segment_ids.contains(&r.segment_id))
            .map(|r| r.document_id.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Indexed documents of a shard whose segment is ready.
    pub fn live_doc_ids(&self, shard_id: u16) -> Vec<String> {
        let st = self.lock();
        st.documents
            .values()
            .filter(|d| {
                d.shard_id == shard_id
                    && d.status == DocStatus::Indexed
                    && d.current_segment_id
                        .and_then(|id| st.segments.get(&id))
                        .map_or(false, |s| s.status == SegmentStatus::Ready)
            })
            .map(|d| d.doc_id.clone())
            .collect()
    }

    // ── compound transactions ──────────────────────────────────────────

    /// Finalize a fresh build: publish the segment, advance its documents
    /// to `indexed`, install links. One commit, so search sees all of it
    /// or none of it.
    pub fn apply_build(
        &self,
        segment_id: u64,
        stats: &SegmentStats,
        accepted: &[BuiltDoc],
    ) -> Result<(), Error> {
        let mut st = self.lock();
        let rec = st
            .segments
            .get_mut(&segment_id)
            .ok_or_else(|| Error::Custom(format!("unknown segment {}", segment_id)))?;
        if rec.status != SegmentStatus::Building {
            return Err(Error::Custom(format!(
                "segment {} is {:?}, cannot publish",
                segment_id, rec.status
            )));
        }
        Self::fill_stats(rec, stats);
        rec.status = SegmentStatus::Ready;
        let shard_id = rec.shard_id;

        let now = now_secs();
        for doc in accepted {
            let row = st
                .documents
                .get_mut(&doc.doc_id)
                .ok_or_else(|| Error::Custom(format!("unknown document {}", doc.doc_id)))?;
            row.status = DocStatus::Indexed;
            row.current_segment_id = Some(segment_id);
            row.simhash_hi = doc.simhash.hi;
            row.simhash_lo = doc.simhash.lo;
            row.tok_len = doc.tok_len;
            row.updated_at = now;
            st.segment_docs.push(SegmentDocRow {
                segment_id,
                document_id: doc.doc_id.clone(),
                shard_id,
            });
        }
        self.commit(&st, Some(shard_id))?;
        info!(
            "[STORE] build finalized: segment {} ready with {} docs",
            segment_id,
            accepted.len()
        );
        Ok(())
    }

    /// Finalize a compaction: publish the output, relink every affected
    /// document, retire the inputs. Single commit; a reader sees either
    /// the old N segments or the new one, never both or neither.
    pub fn apply_compaction(
        &self,
        new_segment_id: u64,
        stats: &SegmentStats,
        accepted: &[BuiltDoc],
        input_ids: &[u64],
    ) -> Result<(), Error> {
        let mut st = self.lock();
        // validate the whole transition before mutating anything
        for id in input_ids {
            match st.segments.get(id) {
                Some(s) if s.status == SegmentStatus::Ready => {}
                Some(s) => {
                    return Err(Error::Custom(format!(
                        "input segment {} is {:?}, cannot retire",
                        id, s.status
                    )))
                }
                None => return Err(Error::Custom(format!("unknown segment {}", id))),
            }
        }
        for doc in accepted {
            if !st.documents.contains_key(&doc.doc_id) {
                return Err(Error::Custom(format!("unknown document {}", doc.doc_id)));
            }
        }
        let rec = st
            .segments
            .get_mut(&new_segment_id)
            .ok_or_else(|| Error::Custom(format!("unknown segment {}", new_segment_id)))?;
        if rec.status != SegmentStatus::Building {
            return Err(Error::Custom(format!(
                "segment {} is {:?}, cannot publish",
                new_segment_id, rec.status
            )));
        }
        Self::fill_stats(rec, stats);
        rec.status = SegmentStatus::Ready;
        rec.last_compacted_at = Some(now_secs());
        let shard_id = rec.shard_id;

        let now = now_secs();
        for doc in accepted {
            let row = st
                .documents
                .get_mut(&doc.doc_id)
                .ok_or_else(|| Error::Custom(format!("unknown document {}", doc.doc_id)))?;
            row.status = DocStatus::Indexed;
            row.current_segment_id = Some(new_segment_id);
            row.updated_at = now;
        }
        st.segment_docs
            .retain(|r| !input_ids.contains(&r.segment_id));
        for doc in accepted {
            st.segment_docs.push(SegmentDocRow {
                segment_id: new_segment_id,
                document_id: doc.doc_id.clone(),
                shard_id,
            });
        }
        for id in input_ids {
            if let Some(input) = st.segments.get_mut(id) {
                input.status = SegmentStatus::Merged;
                input.reserved = false;
                input.last_compacted_at = Some(now);
            }
        }
        self.commit(&st, Some(shard_id))?;
        info!(
            "[STORE] compaction finalized: {:?} -> segment {} ({} docs)",
            input_ids,
            new_segment_id,
            accepted.len()
        );
        Ok(())
    }

    // ── error log ──────────────────────────────────────────────────────

    pub fn log_index_error(
        &self,
        stage: &str,
        code: Option<&str>,
        message: &str,
        doc_id: Option<&str>,
        segment_id: Option<u64>,
    ) {
        let mut st = self.lock();
        let mut msg = message.to_string();
        msg.truncate(2000);
        st.errors.push(IndexErrorRecord {
            stage: stage.to_string(),
            code: code.map(str::to_string),
            message: msg,
            doc_id: doc_id.map(str::to_string),
            segment_id,
            created_at: now_secs(),
        });
        if let Err(e) = self.commit(&st, None) {
            warn!("catalog commit failed while logging index error: {}", e);
        }
    }

    pub fn errors(&self) -> Vec<IndexErrorRecord> {
        self.lock().errors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::SimHash128;

    fn catalog() -> (tempfile::TempDir, Catalog) {
        let dir = tempfile::tempdir().unwrap();
        let paths = RootPaths::new(dir.path());
        let cat = Catalog::open(&paths).unwrap();
        (dir, cat)
    }

    fn stats(n: u32) -> SegmentStats {
        SegmentStats {
            n_docs: n,
            k9: 10,
            k13: 5,
            tok_total: 100,
            size_bytes: 1024,
            checksum_bin: "cafe".to_string(),
            config_digest: "cfg".to_string(),
        }
    }

    fn built(doc_id: &str, internal_id: u32) -> BuiltDoc {
        BuiltDoc {
            doc_id: doc_id.to_string(),
            internal_id,
            tok_len: 20,
            simhash: SimHash128 { hi: 1, lo: 2 },
        }
    }

    #[test]
    fn test_allocate_monotonic() {
        let (_d, cat) = catalog();
        let a = cat.allocate(0, 1).unwrap();
        let b = cat.allocate(0, 1).unwrap();
        assert!(b.segment_id > a.segment_id);
        assert_eq!(a.status, SegmentStatus::Building);
    }

    #[test]
    fn test_publish_then_double_publish_rejected() {
        let (_d, cat) = catalog();
        let seg = cat.allocate(0, 1).unwrap();
        cat.publish(seg.segment_id, &stats(2)).unwrap();
        assert!(cat.publish(seg.segment_id, &stats(2)).is_err());
        let ready = cat.list_ready(0, None);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].doc_count, 2);
    }

    #[test]
    fn test_retire_refused_while_docs_point() {
        let (_d, cat) = catalog();
        let seg = cat.allocate(0, 1).unwrap();
        cat.register_document("d1", 0, None, None).unwrap();
        cat.apply_build(seg.segment_id, &stats(1), &[built("d1", 0)])
            .unwrap();
        assert!(cat.retire(seg.segment_id).is_err());
    }

    #[test]
    fn test_lock_for_compaction_skips_reserved_and_requires_n() {
        let (_d, cat) = catalog();
        for _ in 0..3 {
            let seg = cat.allocate(0, 1).unwrap();
            cat.publish(seg.segment_id, &stats(1)).unwrap();
        }
        // only 3 ready: asking for 4 reserves nothing
        assert!(cat.lock_for_compaction(0, 1, 4).unwrap().is_empty());

        let first = cat.lock_for_compaction(0, 1, 2).unwrap();
        assert_eq!(first.len(), 2);
        // a concurrent compactor sees only the remaining one
        assert!(cat.lock_for_compaction(0, 1, 2).unwrap().is_empty());
        let rest = cat.lock_for_compaction(0, 1, 1).unwrap();
        assert_eq!(rest.len(), 1);
        assert_ne!(rest[0].segment_id, first[0].segment_id);
        assert_ne!(rest[0].segment_id, first[1].segment_id);
    }

    #[test]
    fn test_apply_compaction_is_atomic_relink() {
        let (_d, cat) = catalog();
        let a = cat.allocate(0, 1).unwrap();
        let b = cat.allocate(0, 1).unwrap();
        cat.register_document("d1", 0, None, None).unwrap();
        cat.register_document("d2", 0, None, None).unwrap();
        cat.apply_build(a.segment_id, &stats(1), &[built("d1", 0)])
            .unwrap();
        cat.apply_build(b.segment_id, &stats(1), &[built("d2", 0)])
            .unwrap();

        let merged = cat.allocate(0, 2).unwrap();
        cat.apply_compaction(
            merged.segment_id,
            &stats(2),
            &[built("d1", 0), built("d2", 1)],
            &[a.segment_id, b.segment_id],
        )
        .unwrap();

        let ready = cat.list_ready(0, None);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].segment_id, merged.segment_id);
        assert_eq!(ready[0].level, 2);
        assert_eq!(
            cat.document("d1").unwrap().current_segment_id,
            Some(merged.segment_id)
        );
        assert_eq!(
            cat.docs_in_segments(&[merged.segment_id]),
            vec!["d1".to_string(), "d2".to_string()]
        );
        // inputs are merged and no longer hold links
        assert!(cat.docs_in_segments(&[a.segment_id, b.segment_id]).is_empty());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RootPaths::new(dir.path());
        {
            let cat = Catalog::open(&paths).unwrap();
            let seg = cat.allocate(3, 1).unwrap();
            cat.publish(seg.segment_id, &stats(1)).unwrap();
        }
        let cat = Catalog::open(&paths).unwrap();
        assert_eq!(cat.list_ready(3, None).len(), 1);
        // id allocation continues after the persisted high-water mark
        assert!(cat.allocate(3, 1).unwrap().segment_id > 1);
    }

    #[test]
    fn test_quarantine_drops_from_manifest() {
        let (dir, cat) = catalog();
        let seg = cat.allocate(0, 1).unwrap();
        cat.publish(seg.segment_id, &stats(1)).unwrap();
        cat.mark_segment_error(seg.segment_id, "search", "checksum mismatch");

        assert!(cat.list_ready(0, None).is_empty());
        let manifest = crate::store::manifest::read_manifest(
            &RootPaths::new(dir.path()).manifest_path(0),
        )
        .unwrap();
        assert!(manifest.segments.is_empty());
        assert_eq!(cat.errors().len(), 1);
    }
}
