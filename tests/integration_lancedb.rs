#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

/// Integration tests for the LanceDB vector store with realistic data
use std::path::PathBuf;
use std::sync::Arc;

use council_rag::config::{Config, OllamaConfig};
use council_rag::database::lancedb::{IndexEntry, SearchResult, VectorStore};
use council_rag::embeddings::ContentChunk;
use council_rag::loader::DocumentKind;
use tempfile::TempDir;
use tokio::sync::RwLock;

const DIMENSION: usize = 384;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ollama: OllamaConfig::default(),
        ..Config::default()
    };
    (config, temp_dir)
}

/// Smooth pseudo-embedding, distinct per `variation`
fn realistic_vector(variation: f32) -> Vec<f32> {
    (0..DIMENSION)
        .map(|i| ((i as f32).mul_add(0.01, variation).sin() * 0.1) + 0.01)
        .collect()
}

fn realistic_entry(meeting: usize, chunk_index: usize, variation: f32) -> IndexEntry {
    let content = format!(
        "Meeting {} item {}: the council discussed the capital improvement plan.",
        meeting, chunk_index
    );
    let chunk = ContentChunk {
        token_count: content.len() / 4,
        end_offset: content.len(),
        content,
        source: PathBuf::from(format!("data/pdfs/minutes-{:03}.pdf", meeting)),
        kind: DocumentKind::Pdf,
        page: Some(chunk_index as u32 + 1),
        title: None,
        chunk_index,
        start_offset: 0,
    };
    IndexEntry::new(&chunk, realistic_vector(variation), "0123abcd")
}

fn summarize(results: &[SearchResult]) -> Vec<(String, u64)> {
    results
        .iter()
        .map(|r| (r.metadata.content.clone(), r.sequence))
        .collect()
}

#[tokio::test]
async fn large_batches_and_reopen_are_deterministic() {
    let (config, _temp_dir) = create_test_config();
    let probe = realistic_vector(1.5);

    let before = {
        let mut store = VectorStore::open(&config).await.expect("open");
        for meeting in 0..4 {
            let entries: Vec<IndexEntry> = (0..50)
                .map(|i| realistic_entry(meeting, i, (meeting * 50 + i) as f32 * 0.013))
                .collect();
            assert_eq!(store.insert(entries).await.expect("insert"), 50);
        }
        assert_eq!(store.count().await.expect("count"), 200);
        store.query(&probe, 10).await.expect("query")
    };

    let reopened = VectorStore::open(&config).await.expect("reopen");
    let after = reopened.query(&probe, 10).await.expect("query");
    let again = reopened.query(&probe, 10).await.expect("query");

    assert_eq!(before.len(), 10);
    assert_eq!(summarize(&before), summarize(&after));
    assert_eq!(summarize(&after), summarize(&again));
    assert!(
        after
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );
    assert_eq!(reopened.sources().await.expect("sources").len(), 4);
}

#[tokio::test]
async fn duplicate_vectors_rank_by_insertion_order() {
    let (config, _temp_dir) = create_test_config();
    let mut store = VectorStore::open(&config).await.expect("open");
    let shared = 0.42;

    store
        .insert(vec![realistic_entry(1, 0, shared), realistic_entry(1, 1, 3.0)])
        .await
        .expect("insert");
    store
        .insert(vec![realistic_entry(2, 0, shared)])
        .await
        .expect("insert");

    let results = store
        .query(&realistic_vector(shared), 2)
        .await
        .expect("query");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].sequence, 0);
    assert_eq!(results[1].sequence, 2);
    assert!((results[0].similarity - results[1].similarity).abs() < f32::EPSILON);
    assert!(results[0].metadata.source.ends_with("minutes-001.pdf"));
    assert!(results[1].metadata.source.ends_with("minutes-002.pdf"));
}

#[tokio::test]
async fn concurrent_readers_share_the_store() {
    let (config, _temp_dir) = create_test_config();
    let mut store = VectorStore::open(&config).await.expect("open");
    store
        .insert((0..20).map(|i| realistic_entry(0, i, i as f32 * 0.1)).collect())
        .await
        .expect("insert");
    let store = Arc::new(RwLock::new(store));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                let guard = store.read().await;
                summarize(&guard.query(&realistic_vector(0.55), 3).await.expect("query"))
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("reader task"));
    }
    assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(outcomes[0].len(), 3);
}
