/*! Engine facade.

Owns the config, the catalog and the work queue, and exposes the
operations the CLI and the task runner drive: ingest, L1 builds,
compaction, monolith rebuilds and search.

Search works on immutable [ShardSnapshot]s: the set of open segment
readers for a shard, keyed by the catalog's publication generation.
Publication is a release barrier (the catalog commit bumps the counter);
a query issued afterwards takes an acquire read, misses the cached
snapshot and re-opens the current ready set.
!*/
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::config::{EngineConfig, RootPaths};
use crate::error::Error;
use crate::io::{append_record, CorpusRecord};
use crate::queue::{
    BuildL1Payload, CompactLevelPayload, EtlDocPayload, MonolithPayload, Task, TaskType, WorkQueue,
};
use crate::search::{
    matching_fragments, search_segments, Deadline, DocumentHit, HitDetails, PreparedQuery,
    SearchResponse,
};
use crate::segment::{Compactor, CorpusSource, SegmentBuilder, SegmentReader, SourceStore};
use crate::store::{Catalog, DocStatus};
use crate::text::normalize;

pub struct ShardSnapshot {
    pub generation: u64,
    pub segments: Vec<Arc<SegmentReader>>,
}

pub struct Engine {
    cfg: EngineConfig,
    paths: RootPaths,
    catalog: Catalog,
    queue: WorkQueue,
    snapshots: RwLock<HashMap<u16, Arc<ShardSnapshot>>>,
}

impl Engine {
    /// Open with config from defaults + `PLAGIO_*` environment.
    pub fn open(root: &Path) -> Result<Self, Error> {
        Self::with_config(root, EngineConfig::from_env())
    }

    pub fn with_config(root: &Path, cfg: EngineConfig) -> Result<Self, Error> {
        cfg.validate()?;
        let paths = RootPaths::new(root);
        paths.ensure()?;
        let catalog = Catalog::open(&paths)?;
        let queue = WorkQueue::open(&paths.queue_dir())?;
        Ok(Self {
            cfg,
            paths,
            catalog,
            queue,
            snapshots: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn paths(&self) -> &RootPaths {
        &self.paths
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Static partitioning: doc_id hash modulo shard count.
    pub fn shard_for(&self, doc_id: &str) -> u16 {
        let d = Sha1::digest(doc_id.as_bytes());
        let x = u64::from_be_bytes([d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]]);
        (x % self.cfg.n_shards as u64) as u16
    }

    // ── ingest ─────────────────────────────────────────────────────────

    /// The `etl_doc` task body: record the document, append it to the
    /// corpus (the system of record for raw text), gate on normalization.
    pub fn ingest_record(&self, shard_id: u16, record: &CorpusRecord) -> Result<(), Error> {
        if record.doc_id.is_empty() {
            return Err(Error::BadInput("empty doc_id".to_string()));
        }
        self.catalog.register_document(
            &record.doc_id,
            shard_id,
            record.title.as_deref(),
            record.author.as_deref(),
        )?;
        append_record(&self.paths.corpus_jsonl(), record)?;

        let tokens = normalize(&record.text);
        if tokens.is_empty() {
            self.catalog
                .mark_document_status(&record.doc_id, DocStatus::Error)?;
            self.catalog.log_index_error(
                "etl",
                Some("EMPTY"),
                "document is empty after normalization",
                Some(&record.doc_id),
                None,
            );
            return Err(Error::BadInput(format!(
                "document {} is empty after normalization",
                record.doc_id
            )));
        }
        // re-ingest of an already indexed doc updates the corpus only;
        // status stays where it is
        let status = self.catalog.document(&record.doc_id).map(|d| d.status);
        if matches!(status, Some(DocStatus::Uploaded) | Some(DocStatus::Error)) {
            self.catalog
                .mark_document_status(&record.doc_id, DocStatus::Normalized)?;
        }
        Ok(())
    }

    // ── enqueue helpers ────────────────────────────────────────────────

    pub fn enqueue_ingest(&self, shard_id: u16, record: CorpusRecord) -> Result<(), Error> {
        let payload = serde_json::to_value(EtlDocPayload { shard_id, record })?;
        self.queue.enqueue(Task::new(TaskType::EtlDoc, payload))?;
        Ok(())
    }

    pub fn enqueue_build(&self, shard_id: u16) -> Result<(), Error> {
        let payload = serde_json::to_value(BuildL1Payload { shard_id })?;
        self.queue
            .enqueue(Task::new(TaskType::BuildL1Segment, payload))?;
        Ok(())
    }

    pub fn enqueue_compact(&self, shard_id: u16, level: u8) -> Result<(), Error> {
        let payload = serde_json::to_value(CompactLevelPayload { shard_id, level })?;
        self.queue
            .enqueue(Task::new(TaskType::CompactLevel, payload))?;
        Ok(())
    }

    pub fn enqueue_monolith(&self, shard_id: u16) -> Result<(), Error> {
        let payload = serde_json::to_value(MonolithPayload { shard_id })?;
        self.queue
            .enqueue(Task::new(TaskType::RebuildL5Monolith, payload))?;
        Ok(())
    }

    // ── build & compaction ─────────────────────────────────────────────

    /// Build L1 segments from all normalized, unplaced documents of the
    /// shard, batch by batch. Returns the number of documents indexed.
    pub fn build_l1_segments(&self, shard_id: u16) -> Result<usize, Error> {
        if self.catalog.count_unretired(shard_id) > self.cfg.backlog_max {
            return Err(Error::Transient(format!(
                "shard {} has more than {} unretired segments; compaction first",
                shard_id, self.cfg.backlog_max
            )));
        }
        let source = CorpusSource::load(&self.paths.corpus_jsonl())?;
        let builder = SegmentBuilder::new(&self.cfg.index)?;

        let mut attempted: HashSet<String> = HashSet::new();
        let mut total = 0;
        loop {
            let batch: Vec<String> = self
                .catalog
                .documents_for_l1(shard_id, self.cfg.docs_per_l1 + attempted.len())
                .into_iter()
                .filter(|d| !attempted.contains(d))
                .take(self.cfg.docs_per_l1)
                .collect();
            if batch.is_empty() {
                break;
            }
            attempted.extend(batch.iter().cloned());

            let mut records = Vec::with_capacity(batch.len());
            for doc_id in &batch {
                match source.raw_record(doc_id)? {
                    Some(rec) => records.push(rec),
                    None => {
                        warn!("[SEGMENT-L1] source text missing for {}", doc_id);
                        self.catalog.log_index_error(
                            "build",
                            Some("MISSING_SOURCE"),
                            "source text missing at L1 build",
                            Some(doc_id),
                            None,
                        );
                        self.catalog
                            .mark_document_status(doc_id, DocStatus::Error)?;
                    }
                }
            }
            if records.is_empty() {
                continue;
            }

            let seg = self.catalog.allocate(shard_id, 1)?;
            let out_dir = self.paths.segment_dir(shard_id, seg.segment_id);
            info!(
                "[SEGMENT-L1] shard {}: building segment {} with {} docs",
                shard_id,
                seg.segment_id,
                records.len()
            );
            match builder.build(&records, &out_dir) {
                Ok(outcome) => {
                    for skip in &outcome.skipped {
                        self.catalog.log_index_error(
                            "build",
                            Some(skip.code),
                            "document skipped at segment build",
                            Some(&skip.doc_id),
                            Some(seg.segment_id),
                        );
                    }
                    total += outcome.accepted.len();
                    self.catalog
                        .apply_build(seg.segment_id, &outcome.stats, &outcome.accepted)?;
                }
                Err(e) => {
                    self.catalog
                        .mark_segment_error(seg.segment_id, "build", &e.task_message());
                    return Err(e);
                }
            }
        }
        Ok(total)
    }

    pub fn compact_level(&self, shard_id: u16, level: u8) -> Result<usize, Error> {
        let source = CorpusSource::load(&self.paths.corpus_jsonl())?;
        Compactor::new(&self.cfg, &self.paths, &self.catalog, &source)
            .compact_level(shard_id, level)
    }

    /// One maintenance sweep: compact every auto level that reached its
    /// fan-in, bottom up.
    pub fn compact_eligible(&self, shard_id: u16) -> Result<usize, Error> {
        let mut total = 0;
        for level in 1..self.cfg.max_auto_level {
            let per = self.cfg.segments_per_compact(level);
            if self.catalog.list_ready(shard_id, Some(&[level])).len() >= per {
                total += self.compact_level(shard_id, level)?;
            }
        }
        Ok(total)
    }

    pub fn rebuild_monolith(&self, shard_id: u16) -> Result<usize, Error> {
        let source = CorpusSource::load(&self.paths.corpus_jsonl())?;
        Compactor::new(&self.cfg, &self.paths, &self.catalog, &source).rebuild_monolith(shard_id)
    }

    // ── search ─────────────────────────────────────────────────────────

    /// Current snapshot for a shard, rebuilt when the catalog generation
    /// moved. Returns the snapshot and whether any segment was skipped
    /// while (re)opening.
    pub fn snapshot(&self, shard_id: u16) -> (Arc<ShardSnapshot>, bool) {
        let generation = self.catalog.generation();
        if let Ok(cache) = self.snapshots.read() {
            if let Some(snap) = cache.get(&shard_id) {
                if snap.generation == generation {
                    return (snap.clone(), false);
                }
            }
        }

        let ready = self.catalog.list_ready(shard_id, None);
        let mut segments = Vec::with_capacity(ready.len());
        let mut skipped = false;
        for rec in ready {
            let dir = self.paths.index_dir().join(&rec.path);
            match SegmentReader::open(&dir, rec.segment_id) {
                Ok(reader) => {
                    if let Err(e) = self.cfg.index.check_compatible(reader.config()) {
                        warn!("segment {} unusable: {}", rec.segment_id, e);
                        skipped = true;
                        continue;
                    }
                    segments.push(Arc::new(reader));
                }
                Err(Error::CorruptSegment(msg)) => {
                    warn!("segment {} quarantined: {}", rec.segment_id, msg);
                    self.catalog
                        .mark_segment_error(rec.segment_id, "search", &msg);
                    skipped = true;
                }
                Err(e) => {
                    warn!("segment {} skipped: {}", rec.segment_id, e);
                    skipped = true;
                }
            }
        }
        // keyed by the generation observed at entry: a publish (or our own
        // quarantine) that lands meanwhile forces a rebuild on the next
        // query
        let snap = Arc::new(ShardSnapshot {
            generation,
            segments,
        });
        if let Ok(mut cache) = self.snapshots.write() {
            cache.insert(shard_id, snap.clone());
        }
        (snap, skipped)
    }

    /// Fanout search over one shard. A too-short query yields the empty
    /// response, not an error.
    pub fn search(
        &self,
        shard_id: u16,
        text: &str,
        top: usize,
        deadline: &Deadline,
    ) -> Result<SearchResponse, Error> {
        let q = match PreparedQuery::prepare(text, &self.cfg.index) {
            Ok(q) => q,
            Err(Error::BadInput(_)) => return Ok(SearchResponse::empty()),
            Err(e) => return Err(e),
        };
        let top = if top == 0 { self.cfg.final_top } else { top };
        let (snap, skipped) = self.snapshot(shard_id);

        let outcome = search_segments(&snap.segments, &q, &self.cfg.index, top, deadline);

        let mut documents = Vec::with_capacity(outcome.hits.len());
        for (rank, hit) in outcome.hits.iter().enumerate() {
            let seg = snap
                .segments
                .iter()
                .find(|s| s.segment_id() == hit.segment_id);
            let fragments = match seg {
                Some(seg) if rank < self.cfg.index.fragments_for_top => {
                    matching_fragments(seg, &q, hit.internal_id)
                }
                _ => Vec::new(),
            };
            documents.push(DocumentHit {
                doc_id: hit.doc_id.clone(),
                title: seg.and_then(|s| s.title(hit.internal_id).map(str::to_string)),
                author: seg.and_then(|s| s.author(hit.internal_id).map(str::to_string)),
                max_score: hit.score,
                originality_pct: crate::search::originality_pct(hit.score),
                decision: crate::search::decision(
                    hit.score,
                    self.cfg.index.thresholds.plag_thr,
                    self.cfg.index.thresholds.partial_thr,
                )
                .to_string(),
                segment_id: hit.segment_id,
                details: HitDetails {
                    j9: hit.details.j9,
                    c9: hit.details.c9,
                    j13: hit.details.j13,
                    c13: hit.details.c13,
                    inter9: hit.details.inter9,
                    inter13: hit.details.inter13,
                    cand_hits: hit.details.cand_hits,
                    hamming_simhash: hit.details.hamming_simhash,
                    minhash_sim_est: hit.details.minhash_sim_est,
                    matching_fragments: fragments,
                },
            });
        }

        Ok(SearchResponse {
            hits_total: outcome.hits_total,
            docs_found: documents.len(),
            documents,
            partial: skipped,
            truncated: outcome.truncated,
        })
    }

    // ── task dispatch ──────────────────────────────────────────────────

    pub fn run_task(&self, task: &Task) -> Result<(), Error> {
        match task.task_type {
            TaskType::EtlDoc => {
                let p: EtlDocPayload = serde_json::from_value(task.payload.clone())?;
                self.ingest_record(p.shard_id, &p.record)
            }
            TaskType::BuildL1Segment => {
                let p: BuildL1Payload = serde_json::from_value(task.payload.clone())?;
                self.build_l1_segments(p.shard_id).map(|_| ())
            }
            TaskType::CompactLevel => {
                let p: CompactLevelPayload = serde_json::from_value(task.payload.clone())?;
                self.compact_level(p.shard_id, p.level).map(|_| ())
            }
            TaskType::RebuildL5Monolith => {
                let p: MonolithPayload = serde_json::from_value(task.payload.clone())?;
                self.rebuild_monolith(p.shard_id).map(|_| ())
            }
        }
    }

    // ── status ─────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusReport {
        let mut shards = Vec::new();
        for shard_id in 0..self.cfg.n_shards {
            let ready = self.catalog.list_ready(shard_id, None);
            let mut by_level: HashMap<u8, usize> = HashMap::new();
            for seg in &ready {
                *by_level.entry(seg.level).or_insert(0) += 1;
            }
            let levels: Vec<(u8, usize)> = by_level.into_iter().sorted().collect();
            shards.push(ShardStatus {
                shard_id,
                ready_segments: ready.len(),
                levels,
                unretired: self.catalog.count_unretired(shard_id),
            });
        }
        let queue = TaskType::POLL_ORDER
            .iter()
            .map(|t| QueueStatus {
                task_type: t.dir_name().to_string(),
                pending: self.queue.pending_count(*t),
                failed: self.queue.failed_count(*t),
            })
            .collect();
        StatusReport {
            shards,
            queue,
            index_errors: self.catalog.errors().len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShardStatus {
    pub shard_id: u16,
    pub ready_segments: usize,
    pub levels: Vec<(u8, usize)>,
    pub unretired: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueStatus {
    pub task_type: String,
    pub pending: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    pub shards: Vec<ShardStatus>,
    pub queue: Vec<QueueStatus>,
    pub index_errors: usize,
}
