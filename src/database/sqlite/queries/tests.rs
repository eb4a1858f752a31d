use super::*;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::raw_sql(include_str!("../migrations/0001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn new_source(path: &str, hash: &str, chunks: i64) -> NewIngestedSource {
    NewIngestedSource {
        source_path: path.to_string(),
        content_hash: hash.to_string(),
        kind: "pdf".to_string(),
        chunk_count: chunks,
    }
}

#[tokio::test]
async fn manifest_first_insert_wins() {
    let (_temp_dir, pool) = create_test_pool().await;

    assert!(ManifestQueries::get(&pool).await.expect("get").is_none());

    ManifestQueries::insert_if_missing(&pool, "all-minilm:latest", 384)
        .await
        .expect("insert");
    ManifestQueries::insert_if_missing(&pool, "nomic-embed-text", 768)
        .await
        .expect("second insert is ignored");

    let manifest = ManifestQueries::get(&pool)
        .await
        .expect("get")
        .expect("manifest exists");
    assert_eq!(manifest.embedding_model, "all-minilm:latest");
    assert_eq!(manifest.embedding_dimension, 384);

    ManifestQueries::delete(&pool).await.expect("delete");
    assert!(ManifestQueries::get(&pool).await.expect("get").is_none());
}

#[tokio::test]
async fn source_upsert_replaces_hash() {
    let (_temp_dir, pool) = create_test_pool().await;

    let created = SourceQueries::upsert(&pool, new_source("data/pdfs/a.pdf", "h1", 3))
        .await
        .expect("upsert");
    assert_eq!(created.content_hash, "h1");
    assert_eq!(created.chunk_count, 3);

    let updated = SourceQueries::upsert(&pool, new_source("data/pdfs/a.pdf", "h2", 5))
        .await
        .expect("upsert");
    assert_eq!(updated.content_hash, "h2");
    assert_eq!(updated.chunk_count, 5);

    SourceQueries::upsert(&pool, new_source("data/json/b.json", "h3", 1))
        .await
        .expect("upsert");

    let all = SourceQueries::list_all(&pool).await.expect("list");
    let paths: Vec<&str> = all.iter().map(|s| s.source_path.as_str()).collect();
    assert_eq!(paths, vec!["data/json/b.json", "data/pdfs/a.pdf"]);

    assert_eq!(SourceQueries::delete_all(&pool).await.expect("delete"), 2);
    assert!(
        SourceQueries::get_by_path(&pool, "data/pdfs/a.pdf")
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn source_batch_is_all_or_nothing() {
    let (_temp_dir, pool) = create_test_pool().await;
    sqlx::raw_sql(
        "CREATE TRIGGER reject_locked_source BEFORE INSERT ON ingested_sources \
         WHEN NEW.source_path = 'data/locked.pdf' \
         BEGIN SELECT RAISE(ABORT, 'source is locked'); END;",
    )
    .execute(&pool)
    .await
    .expect("create trigger");

    let result = SourceQueries::upsert_batch(
        &pool,
        vec![
            new_source("data/pdfs/a.pdf", "h1", 2),
            new_source("data/locked.pdf", "h2", 1),
        ],
    )
    .await;

    assert!(result.is_err());
    assert!(SourceQueries::list_all(&pool).await.expect("list").is_empty());

    let recorded = SourceQueries::upsert_batch(
        &pool,
        vec![
            new_source("data/pdfs/a.pdf", "h1", 2),
            new_source("data/json/b.json", "h3", 1),
        ],
    )
    .await
    .expect("batch");
    assert_eq!(recorded, 2);
    assert_eq!(SourceQueries::list_all(&pool).await.expect("list").len(), 2);
}

#[tokio::test]
async fn run_lifecycle() {
    let (_temp_dir, pool) = create_test_pool().await;

    let run = RunQueries::start(&pool, true).await.expect("start");
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.rebuild);
    assert!(run.finished_date.is_none());

    let update = RunUpdate {
        documents: 4,
        skipped_unchanged: 1,
        chunks: 12,
        entries_written: 12,
        error_message: None,
    };
    let finished = RunQueries::finish(&pool, run.id, RunStatus::Done, &update)
        .await
        .expect("finish")
        .expect("run exists");

    assert_eq!(finished.status, RunStatus::Done);
    assert_eq!(finished.documents, 4);
    assert_eq!(finished.entries_written, 12);
    assert!(finished.finished_date.is_some());
}

#[tokio::test]
async fn recent_runs_newest_first() {
    let (_temp_dir, pool) = create_test_pool().await;

    let first = RunQueries::start(&pool, false).await.expect("start");
    let second = RunQueries::start(&pool, false).await.expect("start");
    RunQueries::finish(
        &pool,
        first.id,
        RunStatus::Failed,
        &RunUpdate {
            error_message: Some("Model unavailable".to_string()),
            ..RunUpdate::default()
        },
    )
    .await
    .expect("finish");

    let runs = RunQueries::list_recent(&pool, 10).await.expect("list");
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id);
    assert_eq!(runs[1].status, RunStatus::Failed);
    assert_eq!(runs[1].error_message.as_deref(), Some("Model unavailable"));

    let limited = RunQueries::list_recent(&pool, 1).await.expect("list");
    assert_eq!(limited.len(), 1);
}
