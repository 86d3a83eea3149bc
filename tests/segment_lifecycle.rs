use std::sync::atomic::AtomicBool;

use plagio::config::EngineConfig;
use plagio::engine::Engine;
use plagio::io::CorpusRecord;
use plagio::queue::{TaskRunner, TaskType};
use plagio::search::Deadline;
use plagio::segment::format::BIN_FILE;
use plagio::store::SegmentStatus;

fn rec(doc_id: &str, text: &str) -> CorpusRecord {
    CorpusRecord {
        doc_id: doc_id.to_string(),
        text: text.to_string(),
        title: None,
        author: None,
    }
}

fn doc_text(seed: usize) -> String {
    (0..16)
        .map(|i| format!("корпус{}", seed * 1000 + i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ten docs land in three L1 segments (4 + 4 + 2).
fn engine_with_three_l1(dir: &std::path::Path) -> Engine {
    let mut cfg = EngineConfig::default();
    cfg.docs_per_l1 = 4;
    cfg.segments_per_l2 = 3;
    let engine = Engine::with_config(dir, cfg).unwrap();
    for i in 0..10 {
        engine
            .ingest_record(0, &rec(&format!("doc{:02}", i), &doc_text(i)))
            .unwrap();
    }
    engine.build_l1_segments(0).unwrap();
    engine
}

#[test]
fn compaction_preserves_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_three_l1(dir.path());

    let l1 = engine.catalog().list_ready(0, Some(&[1]));
    assert_eq!(l1.len(), 3);
    assert_eq!(
        l1.iter().map(|s| s.doc_count).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );

    let query = doc_text(7);
    let before = engine.search(0, &query, 5, &Deadline::none()).unwrap();
    assert_eq!(before.docs_found, 1);
    assert_eq!(before.documents[0].doc_id, "doc07");

    let promoted = engine.compact_level(0, 1).unwrap();
    assert_eq!(promoted, 10);

    // exactly one L2 segment with every doc; inputs are merged
    let ready = engine.catalog().list_ready(0, None);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].level, 2);
    assert_eq!(ready[0].doc_count, 10);
    for seg in &l1 {
        assert_eq!(
            engine.catalog().segment(seg.segment_id).unwrap().status,
            SegmentStatus::Merged
        );
    }

    // the same query returns the same doc with an equal score
    let after = engine.search(0, &query, 5, &Deadline::none()).unwrap();
    assert_eq!(after.docs_found, 1);
    assert_eq!(after.documents[0].doc_id, "doc07");
    assert_eq!(after.documents[0].max_score, before.documents[0].max_score);
    assert_eq!(
        serde_json::to_string(&after.documents[0].details).unwrap(),
        serde_json::to_string(&before.documents[0].details).unwrap()
    );
}

#[test]
fn corrupt_segment_is_skipped_and_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_three_l1(dir.path());

    let l1 = engine.catalog().list_ready(0, Some(&[1]));
    let victim = &l1[0];

    // flip one byte inside post9 of the victim's binary
    let bin_path = engine
        .paths()
        .index_dir()
        .join(&victim.path)
        .join(BIN_FILE);
    let mut bytes = std::fs::read(&bin_path).unwrap();
    // header (28) + doc_meta (4 docs * 20) puts post9 at offset 108
    let flip_at = 110;
    bytes[flip_at] ^= 0xFF;
    std::fs::write(&bin_path, &bytes).unwrap();

    // docs 4..10 live in the two intact segments
    let query = doc_text(7);
    let response = engine.search(0, &query, 5, &Deadline::none()).unwrap();
    assert!(response.partial);
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.documents[0].doc_id, "doc07");

    assert_eq!(
        engine.catalog().segment(victim.segment_id).unwrap().status,
        SegmentStatus::Error
    );
    // follow-up searches still work against the remaining segments
    let again = engine.search(0, &query, 5, &Deadline::none()).unwrap();
    assert!(!again.partial);
    assert_eq!(again.docs_found, 1);
}

#[test]
fn every_live_doc_is_in_exactly_one_ready_segment() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_three_l1(dir.path());

    let check = |engine: &Engine| {
        let ready = engine.catalog().list_ready(0, None);
        for i in 0..10 {
            let doc_id = format!("doc{:02}", i);
            let holders = ready
                .iter()
                .filter(|s| {
                    engine
                        .catalog()
                        .docs_in_segments(&[s.segment_id])
                        .contains(&doc_id)
                })
                .count();
            assert_eq!(holders, 1, "{} held by {} ready segments", doc_id, holders);
        }
    };
    check(&engine);
    engine.compact_level(0, 1).unwrap();
    check(&engine);
}

#[test]
fn monolith_rebuild_through_task_queue() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_three_l1(dir.path());

    engine.enqueue_monolith(0).unwrap();
    let runner = TaskRunner::new(&engine);
    assert_eq!(runner.run_pending(), 1);

    let ready = engine.catalog().list_ready(0, None);
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].level, 5);
    assert_eq!(ready[0].doc_count, 10);

    let response = engine
        .search(0, &doc_text(3), 5, &Deadline::none())
        .unwrap();
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.documents[0].doc_id, "doc03");
}

#[test]
fn failed_compaction_leaves_inputs_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_three_l1(dir.path());

    // lose one doc's source text: strict mode must abort the compaction
    let corpus = engine.paths().corpus_jsonl();
    let kept: Vec<String> = std::fs::read_to_string(&corpus)
        .unwrap()
        .lines()
        .filter(|l| !l.contains("doc05"))
        .map(str::to_string)
        .collect();
    std::fs::write(&corpus, kept.join("\n") + "\n").unwrap();

    assert!(engine.compact_level(0, 1).is_err());

    let ready = engine.catalog().list_ready(0, Some(&[1]));
    assert_eq!(ready.len(), 3);
    let response = engine
        .search(0, &doc_text(5), 5, &Deadline::none())
        .unwrap();
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.documents[0].doc_id, "doc05");
}

#[test]
fn worker_pool_drains_queue_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = EngineConfig::default();
    cfg.docs_per_l1 = 5;
    let engine = Engine::with_config(dir.path(), cfg).unwrap();

    for i in 0..10 {
        engine
            .enqueue_ingest(0, rec(&format!("doc{:02}", i), &doc_text(i)))
            .unwrap();
    }

    // two workers, stop once the queue is drained
    let runner = TaskRunner::new(&engine);
    let stop = AtomicBool::new(false);
    std::thread::scope(|scope| {
        scope.spawn(|| {
            while engine.queue().pending_count(TaskType::EtlDoc) > 0 {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            std::thread::sleep(std::time::Duration::from_millis(200));
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });
        runner.run_loop(2, &stop);
    });

    engine.build_l1_segments(0).unwrap();
    let ready = engine.catalog().list_ready(0, None);
    assert_eq!(ready.iter().map(|s| s.doc_count).sum::<u32>(), 10);
}

#[test]
fn backpressure_rejects_l1_builds() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = EngineConfig::default();
    cfg.docs_per_l1 = 1;
    cfg.backlog_max = 2;
    let engine = Engine::with_config(dir.path(), cfg).unwrap();
    for i in 0..5 {
        engine
            .ingest_record(0, &rec(&format!("doc{}", i), &doc_text(i)))
            .unwrap();
    }
    // first call builds 5 one-doc segments, blowing past the backlog
    engine.build_l1_segments(0).unwrap();
    engine
        .ingest_record(0, &rec("late", &doc_text(99)))
        .unwrap();
    let err = engine.build_l1_segments(0).unwrap_err();
    assert!(matches!(err, plagio::error::Error::Transient(_)));
}
