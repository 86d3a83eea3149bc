use plagio::config::EngineConfig;
use plagio::engine::Engine;
use plagio::io::CorpusRecord;
use plagio::search::Deadline;

fn rec(doc_id: &str, text: &str) -> CorpusRecord {
    CorpusRecord {
        doc_id: doc_id.to_string(),
        text: text.to_string(),
        title: Some(format!("title of {}", doc_id)),
        author: Some("автор".to_string()),
    }
}

fn engine_with_docs(docs: &[(&str, &str)]) -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::with_config(dir.path(), EngineConfig::default()).unwrap();
    for (doc_id, text) in docs {
        engine.ingest_record(0, &rec(doc_id, text)).unwrap();
    }
    engine.build_l1_segments(0).unwrap();
    (dir, engine)
}

const D1: &str = "the quick brown fox jumps over the lazy dog and a cat too";

#[test]
fn identical_text_is_plagiarism() {
    let (_dir, engine) = engine_with_docs(&[("D1", D1)]);

    let response = engine.search(0, D1, 5, &Deadline::none()).unwrap();
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.hits_total, 1);

    let hit = &response.documents[0];
    assert_eq!(hit.doc_id, "D1");
    assert_eq!(hit.details.j13, 1.0);
    assert_eq!(hit.details.c13, 1.0);
    assert_eq!(hit.details.j9, 1.0);
    assert_eq!(hit.details.c9, 1.0);
    assert!(hit.max_score >= 0.70);
    assert_eq!(hit.decision, "plagiarism");
    // identical text earns the simhash bonus on top of w9
    assert_eq!(hit.max_score, 0.92);
    assert_eq!(hit.details.hamming_simhash, 0);
    assert_eq!(hit.title.as_deref(), Some("title of D1"));

    // the whole query is one merged matching fragment
    let frags = &hit.details.matching_fragments;
    assert_eq!(frags.len(), 1);
    assert_eq!(frags[0].start, 0);
    assert_eq!(frags[0].end, 13);
    assert_eq!(frags[0].text, D1);
}

#[test]
fn short_query_rejected_with_empty_response() {
    let (_dir, engine) = engine_with_docs(&[("D1", D1)]);

    let response = engine.search(0, "abc def ghi", 5, &Deadline::none()).unwrap();
    assert_eq!(response.hits_total, 0);
    assert_eq!(response.docs_found, 0);
    assert!(response.documents.is_empty());
    assert!(!response.partial);
}

#[test]
fn partial_overlap_scores_between_zero_and_plagiarism() {
    let (_dir, engine) = engine_with_docs(&[("D2", "a b c d e f g h i j k l m")]);

    let response = engine
        .search(0, "a b c d e f g h i x y z w", 5, &Deadline::none())
        .unwrap();
    assert_eq!(response.docs_found, 1);
    let hit = &response.documents[0];
    assert_eq!(hit.doc_id, "D2");
    // only the first nine-gram window survives
    assert_eq!(hit.details.inter9, 1);
    assert_eq!(hit.details.inter13, 0);
    assert!(hit.max_score > 0.0);
    assert!(hit.max_score < 0.70);
    assert!(hit.decision == "partial" || hit.decision == "original");
}

#[test]
fn unrelated_text_is_not_found() {
    let (_dir, engine) = engine_with_docs(&[("D1", D1)]);
    let response = engine
        .search(
            0,
            "совсем другой текст про степи казахстана и историю города алматы",
            5,
            &Deadline::none(),
        )
        .unwrap();
    assert_eq!(response.docs_found, 0);
}

#[test]
fn search_is_deterministic() {
    let (_dir, engine) = engine_with_docs(&[
        ("D1", D1),
        ("D2", "the quick brown fox jumps over the lazy dog and a bird too"),
        ("D3", "один два три четыре пять шесть семь восемь девять десять"),
    ]);

    let a = engine.search(0, D1, 5, &Deadline::none()).unwrap();
    let b = engine.search(0, D1, 5, &Deadline::none()).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
    // near-duplicate ranks below the exact copy
    assert_eq!(a.documents[0].doc_id, "D1");
    assert!(a.documents[0].max_score > a.documents[1].max_score);
}

#[test]
fn normalizer_is_shared_between_index_and_query() {
    // index with typographic noise, query clean: must still be an exact hit
    let noisy = "The\u{00A0}Quick  brown\nfox, jumps; over «the» lazy dog and a cat too!";
    let (_dir, engine) = engine_with_docs(&[("D1", noisy)]);

    let response = engine.search(0, D1, 5, &Deadline::none()).unwrap();
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.documents[0].details.j13, 1.0);
    assert_eq!(response.documents[0].decision, "plagiarism");
}

#[test]
fn soft_hyphen_and_yo_fold_into_index() {
    let long = |word: &str| {
        let mut toks: Vec<String> = (0..12).map(|i| format!("фон{}", i)).collect();
        toks.push(word.to_string());
        toks.join(" ")
    };
    let (_dir, engine) = engine_with_docs(&[("D1", &long("по\u{00AD}крытиё"))]);
    let response = engine
        .search(0, &long("покрытие"), 5, &Deadline::none())
        .unwrap();
    assert_eq!(response.docs_found, 1);
    assert_eq!(response.documents[0].decision, "plagiarism");
}

#[test]
fn score_stays_within_bounds() {
    let (_dir, engine) = engine_with_docs(&[("D1", D1)]);
    let response = engine.search(0, D1, 5, &Deadline::none()).unwrap();
    for doc in &response.documents {
        assert!(doc.max_score >= 0.0);
        assert!(doc.max_score <= 0.92);
        assert!(doc.originality_pct >= 0.0);
        assert!(doc.originality_pct <= 100.0);
    }
}
