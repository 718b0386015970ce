//! Query pipeline and indexing runs against in-process fakes.
//!
//! The embedding provider, language model, and document source are fakes;
//! the vector index, cache, and session memory are the real in-memory
//! implementations.

mod common;

use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{drive_file, FakeModel, FakeSource, Harness, ModelBehavior, WordTokenizer, DIMS};
use nerdsiq::drive::FOLDER_MIME;
use nerdsiq::ingest::{IndexOptions, IndexReport, Indexer};
use nerdsiq_core::cache::{cache_key, QueryCache};
use nerdsiq_core::memory::SessionStore;
use nerdsiq_core::models::IndexPoint;
use nerdsiq_core::provider::{Distance, VectorIndex};
use nerdsiq_core::vector::InMemoryVectorIndex;
use nerdsiq_core::{RagError, Stage};

const COLLECTION: &str = "nerdsiq_docs";

async fn seed_policy_docs(index: &InMemoryVectorIndex) {
    index
        .ensure_collection(COLLECTION, DIMS, Distance::Cosine)
        .await
        .unwrap();
    let docs = [
        ([1.0, 0.0, 0.0, 0.0], "Returns accepted within 30 days.", "Return Policy", "https://x/doc1"),
        ([0.9, 0.1, 0.0, 0.0], "Refunds go to the original card.", "Return Policy", "https://x/doc1"),
        ([0.5, 0.5, 0.0, 0.0], "Store credit is an option.", "Store FAQ", "https://x/doc2"),
    ];
    let points: Vec<IndexPoint> = docs
        .iter()
        .enumerate()
        .map(|(i, (vector, text, name, url))| IndexPoint {
            id: i as u64,
            vector: vector.to_vec(),
            payload: json!({ "text": text, "source_name": name, "source_url": url }),
        })
        .collect();
    index.upsert(COLLECTION, &points).await.unwrap();
}

#[tokio::test]
async fn test_query_end_to_end() {
    let h = Harness::new(FakeModel::answering("Within 30 days with a receipt."));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let answer = rag.query("What is the return policy?", "s1").await.unwrap();

    assert_eq!(answer.answer, "Within 30 days with a receipt.");
    assert_eq!(answer.sources, vec!["https://x/doc1", "https://x/doc2"]);
    assert!(!answer.cached);
    assert_eq!(h.embedder.calls(), 1);
    assert_eq!(h.model.calls(), 1);

    let prompt = h.model.last_prompt().unwrap();
    assert_eq!(prompt.user, "What is the return policy?");
    assert!(prompt.system.contains("[From: Return Policy]\nReturns accepted within 30 days."));
    assert!(prompt.system.contains("\n\n---\n\n[From: Store FAQ]"));

    let exchanges = h.memory.get_or_create("s1").await;
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].question, "What is the return policy?");

    let cached = h.cache.get(&cache_key("What is the return policy?")).await.unwrap();
    assert_eq!(cached.answer, answer.answer);
    assert_eq!(cached.sources, answer.sources);
}

#[tokio::test]
async fn test_repeat_question_served_from_cache() {
    let h = Harness::new(FakeModel::answering("Within 30 days."));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let first = rag.query("What is the return policy?", "s1").await.unwrap();
    let second = rag.query("  WHAT is the return policy?  ", "s2").await.unwrap();

    assert!(second.cached);
    assert_eq!(second.answer, first.answer);
    assert_eq!(second.sources, first.sources);
    assert_eq!(h.embedder.calls(), 1);
    assert_eq!(h.model.calls(), 1);
    // A cache hit does not touch session memory.
    assert!(h.memory.get_or_create("s2").await.is_empty());
}

#[tokio::test]
async fn test_history_reaches_the_prompt() {
    let h = Harness::new(FakeModel::answering("ok"));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    rag.query("first question", "s1").await.unwrap();
    rag.query("second question", "s1").await.unwrap();

    let prompt = h.model.last_prompt().unwrap();
    assert!(prompt.system.contains("User: first question\nAssistant: ok"));
}

#[tokio::test]
async fn test_empty_question_makes_no_calls() {
    let h = Harness::new(FakeModel::answering("unused"));
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let err = rag.query("   ", "s1").await.unwrap_err();
    assert!(matches!(err, RagError::EmptyQuestion));
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.memory.session_count(), 0);
}

#[tokio::test]
async fn test_model_failure_leaves_state_untouched() {
    let h = Harness::new(FakeModel::with(ModelBehavior::Fail));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let err = rag.query("What is the return policy?", "s1").await.unwrap_err();
    assert!(matches!(err, RagError::Provider { stage: Stage::Model, .. }));
    assert!(err.is_retryable());
    assert_eq!(h.cache.stats().entries, 0);
    assert!(h.memory.get_or_create("s1").await.is_empty());
}

#[tokio::test]
async fn test_model_timeout() {
    let h = Harness::new(FakeModel::with(ModelBehavior::Hang));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_millis(50)));

    let err = rag.query("What is the return policy?", "s1").await.unwrap_err();
    assert!(matches!(err, RagError::Timeout { stage: Stage::Model }));
    assert_eq!(h.cache.stats().entries, 0);
    assert!(h.memory.get_or_create("s1").await.is_empty());
}

#[tokio::test]
async fn test_missing_collection_is_a_search_failure() {
    let h = Harness::new(FakeModel::answering("unused"));
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let err = rag.query("anything", "s1").await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Search));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_query() {
    let h = Harness::new(FakeModel::answering("unused"));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = rag
        .query_with_cancel("What is the return policy?", "s1", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled { stage: Stage::Embed }));
    assert_eq!(h.model.calls(), 0);
    assert_eq!(h.cache.stats().entries, 0);
}

#[tokio::test]
async fn test_invalidate_and_clear_session() {
    let h = Harness::new(FakeModel::answering("ok"));
    seed_policy_docs(&h.index).await;
    let rag = h.service(common::settings(Duration::from_secs(5)));

    rag.query("q", "s1").await.unwrap();
    assert_eq!(rag.cache_stats().entries, 1);
    assert_eq!(rag.session_count(), 1);

    rag.invalidate_cache().await;
    rag.clear_session("s1").await;
    assert_eq!(rag.cache_stats().entries, 0);
    assert_eq!(rag.session_count(), 0);

    let again = rag.query("q", "s1").await.unwrap();
    assert!(!again.cached);
    assert_eq!(h.model.calls(), 2);
}

// ============ Indexing ============

fn options(dry_run: bool) -> IndexOptions {
    IndexOptions {
        collection: COLLECTION.to_string(),
        dims: DIMS,
        distance: Distance::Cosine,
        chunk_size: 4,
        overlap: 1,
        dry_run,
    }
}

fn handbook_folder() -> FakeSource {
    FakeSource {
        files: vec![
            (
                drive_file("f1", "Handbook", "text/plain"),
                Some(b"one two three four five six seven".to_vec()),
            ),
            (drive_file("f2", "Empty", "text/plain"), Some(b"  \n ".to_vec())),
            (drive_file("f3", "Broken", "text/plain"), None),
            (drive_file("d1", "Archive", FOLDER_MIME), None),
            (drive_file("f4", "Memo", "text/plain"), Some(b"short memo".to_vec())),
        ],
    }
}

#[tokio::test]
async fn test_index_folder() {
    let source = handbook_folder();
    let tokenizer = WordTokenizer::default();
    let embedder = common::FakeEmbedder::default();
    let index = InMemoryVectorIndex::new();
    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };

    let report = indexer.index_folder("folder", &options(false)).await.unwrap();

    // 7 words with a 4-token window and 1 overlap: [0,4) [3,7) [6,7).
    assert_eq!(
        report,
        IndexReport {
            files_seen: 5,
            files_indexed: 2,
            files_skipped: 3,
            chunks: 4,
        }
    );
    assert_eq!(index.point_ids(COLLECTION), Some(vec![1, 2, 3, 4]));

    let hits = index.search(COLLECTION, &[1.0, 0.0, 0.0, 0.0], 10).await.unwrap();
    let urls: Vec<&str> = hits
        .iter()
        .filter_map(|h| h.payload["source_url"].as_str())
        .collect();
    assert!(urls.contains(&"https://x/f1"));
    assert!(urls.contains(&"https://x/f4"));
}

#[tokio::test]
async fn test_reindex_replaces_collection() {
    let source = handbook_folder();
    let tokenizer = WordTokenizer::default();
    let embedder = common::FakeEmbedder::default();
    let index = InMemoryVectorIndex::new();
    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };

    indexer.index_folder("folder", &options(false)).await.unwrap();
    indexer.index_folder("folder", &options(false)).await.unwrap();
    assert_eq!(index.point_count(COLLECTION), Some(4));
}

#[tokio::test]
async fn test_dry_run_leaves_index_alone() {
    let source = handbook_folder();
    let tokenizer = WordTokenizer::default();
    let embedder = common::FakeEmbedder::default();
    let index = InMemoryVectorIndex::new();
    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };

    let report = indexer.index_folder("folder", &options(true)).await.unwrap();
    assert_eq!(report.files_indexed, 2);
    assert_eq!(report.chunks, 4);
    assert_eq!(index.point_count(COLLECTION), None);
    assert_eq!(embedder.calls(), 0);
}

#[tokio::test]
async fn test_embedding_failure_skips_file() {
    let source = handbook_folder();
    let tokenizer = WordTokenizer::default();
    let embedder = common::FakeEmbedder {
        fail: true,
        ..Default::default()
    };
    let index = InMemoryVectorIndex::new();
    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };

    let report = indexer.index_folder("folder", &options(false)).await.unwrap();
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_skipped, 5);
    assert_eq!(index.point_count(COLLECTION), Some(0));
}

#[tokio::test]
async fn test_binary_download_is_skipped() {
    let source = FakeSource {
        files: vec![
            (
                drive_file("p1", "Scan.pdf", "application/pdf"),
                Some(b"%PDF-1.7\n\xff\xd8\xff\xe0 binary stream".to_vec()),
            ),
            (drive_file("f4", "Memo", "text/plain"), Some(b"short memo".to_vec())),
        ],
    };
    let tokenizer = WordTokenizer::default();
    let embedder = common::FakeEmbedder::default();
    let index = InMemoryVectorIndex::new();
    let indexer = Indexer {
        source: &source,
        tokenizer: &tokenizer,
        embedder: &embedder,
        index: &index,
    };

    let report = indexer.index_folder("folder", &options(false)).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(index.point_count(COLLECTION), Some(1));

    let hits = index.search(COLLECTION, &[1.0, 0.0, 0.0, 0.0], 10).await.unwrap();
    assert!(hits.iter().all(|h| h.payload["source_url"] != "https://x/p1"));
}
