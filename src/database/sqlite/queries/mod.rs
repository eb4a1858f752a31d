#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{debug, warn};

pub struct ManifestQueries;

impl ManifestQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool) -> Result<Option<IndexManifest>> {
        let result = sqlx::query_as::<_, IndexManifest>(
            r#"
            SELECT embedding_model,
                   embedding_dimension,
                   created_date
            FROM index_manifest WHERE id = 1
            "#,
        )
        .fetch_optional(pool)
        .await
        .context("Failed to get index manifest")?;

        Ok(result)
    }

    /// Record the manifest; an existing row is left untouched
    #[inline]
    pub async fn insert_if_missing(pool: &SqlitePool, model: &str, dimension: u32) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO index_manifest (id, embedding_model, embedding_dimension, created_date) VALUES (1, ?, ?, ?)",
        )
        .bind(model)
        .bind(i64::from(dimension))
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("Failed to record index manifest")?;

        Ok(())
    }

    #[inline]
    pub async fn delete(pool: &SqlitePool) -> Result<()> {
        sqlx::query("DELETE FROM index_manifest")
            .execute(pool)
            .await
            .context("Failed to delete index manifest")?;
        Ok(())
    }
}

pub struct SourceQueries;

impl SourceQueries {
    #[inline]
    pub async fn get_by_path(pool: &SqlitePool, source_path: &str) -> Result<Option<IngestedSource>> {
        let result = sqlx::query_as::<_, IngestedSource>(
            r#"
            SELECT source_path,
                   content_hash,
                   kind,
                   chunk_count,
                   indexed_date
            FROM ingested_sources WHERE source_path = ?
            "#,
        )
        .bind(source_path)
        .fetch_optional(pool)
        .await
        .context("Failed to get ingested source")?;

        Ok(result)
    }

    /// Insert a source, or replace the hash and counters of a known path
    #[inline]
    pub async fn upsert(pool: &SqlitePool, source: NewIngestedSource) -> Result<IngestedSource> {
        Self::write(pool, &source).await?;

        debug!("Recorded source {}", source.source_path);
        Self::get_by_path(pool, &source.source_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve recorded source"))
    }

    /// Upsert every source in one transaction; either all are recorded or none
    #[inline]
    pub async fn upsert_batch(pool: &SqlitePool, sources: Vec<NewIngestedSource>) -> Result<usize> {
        let mut transaction = pool
            .begin()
            .await
            .context("Failed to begin transaction for source upsert")?;

        for source in &sources {
            Self::write(&mut *transaction, source).await?;
        }

        transaction
            .commit()
            .await
            .context("Failed to commit source upsert transaction")?;

        debug!("Recorded {} sources", sources.len());
        Ok(sources.len())
    }

    async fn write<'e, E>(executor: E, source: &NewIngestedSource) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO ingested_sources (source_path, content_hash, kind, chunk_count, indexed_date)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_path) DO UPDATE SET
                content_hash = excluded.content_hash,
                kind = excluded.kind,
                chunk_count = excluded.chunk_count,
                indexed_date = excluded.indexed_date
            "#,
        )
        .bind(&source.source_path)
        .bind(&source.content_hash)
        .bind(&source.kind)
        .bind(source.chunk_count)
        .bind(Utc::now())
        .execute(executor)
        .await
        .with_context(|| format!("Failed to upsert ingested source {}", source.source_path))?;

        Ok(())
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<IngestedSource>> {
        let result = sqlx::query_as::<_, IngestedSource>(
            r#"
            SELECT source_path,
                   content_hash,
                   kind,
                   chunk_count,
                   indexed_date
            FROM ingested_sources ORDER BY source_path
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to list ingested sources")?;

        Ok(result)
    }

    #[inline]
    pub async fn delete_all(pool: &SqlitePool) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ingested_sources")
            .execute(pool)
            .await
            .context("Failed to delete ingested sources")?;

        Ok(result.rows_affected())
    }
}

pub struct RunQueries;

impl RunQueries {
    #[inline]
    pub async fn start(pool: &SqlitePool, rebuild: bool) -> Result<IngestionRun> {
        let id = sqlx::query(
            "INSERT INTO ingestion_runs (started_date, status, rebuild) VALUES (?, 'running', ?)",
        )
        .bind(Utc::now())
        .bind(rebuild)
        .execute(pool)
        .await
        .context("Failed to start ingestion run")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve started run"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<IngestionRun>> {
        let result = sqlx::query_as::<_, IngestionRun>(
            r#"
            SELECT id,
                   started_date,
                   finished_date,
                   status,
                   rebuild,
                   documents,
                   skipped_unchanged,
                   chunks,
                   entries_written,
                   error_message
            FROM ingestion_runs WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get ingestion run")?;

        Ok(result)
    }

    #[inline]
    pub async fn finish(
        pool: &SqlitePool,
        id: i64,
        status: RunStatus,
        update: &RunUpdate,
    ) -> Result<Option<IngestionRun>> {
        if status == RunStatus::Running {
            warn!("Finishing run {} with status Running", id);
        }

        sqlx::query(
            r#"
            UPDATE ingestion_runs SET
                finished_date = ?,
                status = ?,
                documents = ?,
                skipped_unchanged = ?,
                chunks = ?,
                entries_written = ?,
                error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(status)
        .bind(update.documents)
        .bind(update.skipped_unchanged)
        .bind(update.chunks)
        .bind(update.entries_written)
        .bind(&update.error_message)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to finish ingestion run")?;

        Self::get_by_id(pool, id).await
    }

    /// Most recent runs first
    #[inline]
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<IngestionRun>> {
        let result = sqlx::query_as::<_, IngestionRun>(
            r#"
            SELECT id,
                   started_date,
                   finished_date,
                   status,
                   rebuild,
                   documents,
                   skipped_unchanged,
                   chunks,
                   entries_written,
                   error_message
            FROM ingestion_runs ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list ingestion runs")?;

        Ok(result)
    }
}
