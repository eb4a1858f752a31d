use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::{RagError, Result};


pub mod models;
pub mod queries;

pub use models::{
    IndexManifest, IngestedSource, IngestionRun, NewIngestedSource, RunStatus, RunUpdate,
};
use queries::{ManifestQueries, RunQueries, SourceQueries};

pub type DbPool = Pool<Sqlite>;

/// Index catalog: embedding model pin, content hashes of ingested files,
/// and the ingestion run log
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

fn database_error(err: anyhow::Error) -> RagError {
    RagError::Database(format!("{:#}", err))
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")
            .map_err(database_error)?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    /// Open the catalog under the configured base directory
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(config.get_base_dir())?;

        Self::new(config.catalog_path()).await
    }

    /// Open a catalog that must already exist.
    ///
    /// A missing file means nothing has been ingested yet, which is a
    /// `Config` error rather than a reason to create one.
    #[inline]
    pub async fn open_existing(config: &Config) -> Result<Self> {
        let path = config.catalog_path();
        if !path.exists() {
            return Err(RagError::Config(
                "Index catalog not found; run `council-rag ingest` first".to_string(),
            ));
        }

        Self::new(path).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")
            .map_err(database_error)?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    // Manifest operations
    #[inline]
    pub async fn manifest(&self) -> Result<Option<IndexManifest>> {
        ManifestQueries::get(&self.pool)
            .await
            .map_err(database_error)
    }

    /// Pin the embedding model on first use, reject a different one afterwards
    #[inline]
    pub async fn ensure_manifest(&self, model: &str, dimension: u32) -> Result<IndexManifest> {
        ManifestQueries::insert_if_missing(&self.pool, model, dimension)
            .await
            .map_err(database_error)?;

        let manifest = self.manifest().await?.ok_or_else(|| {
            RagError::Database("Index manifest missing after insert".to_string())
        })?;
        Self::check_manifest(&manifest, model, dimension)?;
        Ok(manifest)
    }

    /// Check the configured model against the pinned one, if any
    #[inline]
    pub async fn verify_manifest(&self, model: &str, dimension: u32) -> Result<()> {
        match self.manifest().await? {
            Some(manifest) => Self::check_manifest(&manifest, model, dimension),
            None => Ok(()),
        }
    }

    /// Like [`Database::verify_manifest`], but an index that was never
    /// built is an error too
    #[inline]
    pub async fn require_manifest(&self, model: &str, dimension: u32) -> Result<IndexManifest> {
        let manifest = self.manifest().await?.ok_or_else(|| {
            RagError::Config(
                "Index has not been built yet; run `council-rag ingest` first".to_string(),
            )
        })?;
        Self::check_manifest(&manifest, model, dimension)?;
        Ok(manifest)
    }

    fn check_manifest(manifest: &IndexManifest, model: &str, dimension: u32) -> Result<()> {
        if manifest.matches(model, dimension) {
            Ok(())
        } else {
            warn!(
                "Configured embedding model {} ({}) differs from indexed {} ({})",
                model, dimension, manifest.embedding_model, manifest.embedding_dimension
            );
            Err(RagError::Config(format!(
                "Index was built with embedding model '{}' ({} dimensions) but '{}' ({} dimensions) is configured; run `ingest --rebuild`",
                manifest.embedding_model, manifest.embedding_dimension, model, dimension
            )))
        }
    }

    // Source operations
    #[inline]
    pub async fn get_source(&self, source_path: &str) -> Result<Option<IngestedSource>> {
        SourceQueries::get_by_path(&self.pool, source_path)
            .await
            .map_err(database_error)
    }

    /// True when this exact content was already ingested from `source_path`
    #[inline]
    pub async fn is_source_unchanged(&self, source_path: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .get_source(source_path)
            .await?
            .is_some_and(|source| source.content_hash == content_hash))
    }

    #[inline]
    pub async fn record_source(&self, source: NewIngestedSource) -> Result<IngestedSource> {
        SourceQueries::upsert(&self.pool, source)
            .await
            .map_err(database_error)
    }

    /// Record every source of one ingestion run atomically
    #[inline]
    pub async fn record_sources(&self, sources: Vec<NewIngestedSource>) -> Result<usize> {
        SourceQueries::upsert_batch(&self.pool, sources)
            .await
            .map_err(database_error)
    }

    #[inline]
    pub async fn list_sources(&self) -> Result<Vec<IngestedSource>> {
        SourceQueries::list_all(&self.pool)
            .await
            .map_err(database_error)
    }

    /// Forget every ingested source and the model pin
    #[inline]
    pub async fn reset_index(&self) -> Result<()> {
        let removed = SourceQueries::delete_all(&self.pool)
            .await
            .map_err(database_error)?;
        ManifestQueries::delete(&self.pool)
            .await
            .map_err(database_error)?;
        info!("Cleared {} catalog sources", removed);
        Ok(())
    }

    // Ingestion run operations
    #[inline]
    pub async fn start_run(&self, rebuild: bool) -> Result<IngestionRun> {
        RunQueries::start(&self.pool, rebuild)
            .await
            .map_err(database_error)
    }

    #[inline]
    pub async fn finish_run(
        &self,
        id: i64,
        status: RunStatus,
        update: &RunUpdate,
    ) -> Result<Option<IngestionRun>> {
        RunQueries::finish(&self.pool, id, status, update)
            .await
            .map_err(database_error)
    }

    #[inline]
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<IngestionRun>> {
        RunQueries::list_recent(&self.pool, limit)
            .await
            .map_err(database_error)
    }
}
