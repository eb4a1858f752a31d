// Indexer module
// Drives ingestion: load, split, embed, persist


use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::database::lancedb::{IndexEntry, VectorStore};
use crate::database::sqlite::{Database, NewIngestedSource, RunStatus, RunUpdate};
use crate::embeddings::{ContentChunk, Embedder, check_dimension, chunk_documents};
use crate::loader::{Document, load_corpus};
use crate::ollama::OllamaClient;
use crate::{RagError, Result};

/// Where an ingestion run currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionState {
    Idle,
    Loading,
    Splitting,
    Embedding,
    Persisting,
    Done,
    Failed { error: String },
}

impl fmt::Display for IngestionState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Loading => write!(f, "Loading"),
            Self::Splitting => write!(f, "Splitting"),
            Self::Embedding => write!(f, "Embedding"),
            Self::Persisting => write!(f, "Persisting"),
            Self::Done => write!(f, "Done"),
            Self::Failed { error } => write!(f, "Failed: {}", error),
        }
    }
}

/// Counters of a finished ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    /// Documents produced by the loader (one per PDF page)
    pub documents: usize,
    /// Source files skipped because their content was already indexed
    pub skipped_unchanged: usize,
    pub chunks: usize,
    pub entries_written: u64,
}

impl From<&IngestionReport> for RunUpdate {
    #[inline]
    fn from(report: &IngestionReport) -> Self {
        Self {
            documents: report.documents as i64,
            skipped_unchanged: report.skipped_unchanged as i64,
            chunks: report.chunks as i64,
            entries_written: report.entries_written as i64,
            error_message: None,
        }
    }
}

/// Documents of one source file that need (re-)embedding
struct PendingSource {
    content_hash: String,
    kind: String,
    chunk_count: usize,
}

/// Builds or updates the vector index from the configured corpus
pub struct IngestionDriver {
    config: Config,
    embedder: Box<dyn Embedder>,
    store: Arc<RwLock<VectorStore>>,
    catalog: Database,
    state: IngestionState,
    show_progress: bool,
}

impl IngestionDriver {
    #[inline]
    pub fn new(
        config: Config,
        embedder: Box<dyn Embedder>,
        store: Arc<RwLock<VectorStore>>,
        catalog: Database,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
            catalog,
            state: IngestionState::Idle,
            show_progress: console::user_attended_stderr(),
        }
    }

    /// Wire the driver to Ollama, the on-disk vector store and the catalog.
    ///
    /// With `rebuild` an index of another dimension is opened as it is; it
    /// is only replaced once the run has loaded documents.
    #[inline]
    pub async fn from_config(config: Config, rebuild: bool) -> Result<Self> {
        let embedder = OllamaClient::new(&config.ollama)?;
        let store = if rebuild {
            VectorStore::open_for_rebuild(&config).await?
        } else {
            VectorStore::open(&config).await?
        };
        let catalog = Database::open(&config).await?;

        Ok(Self::new(
            config,
            Box::new(embedder),
            Arc::new(RwLock::new(store)),
            catalog,
        ))
    }

    #[inline]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[inline]
    pub fn state(&self) -> &IngestionState {
        &self.state
    }

    /// Shared handle to the vector store this driver writes to
    #[inline]
    pub fn store(&self) -> Arc<RwLock<VectorStore>> {
        Arc::clone(&self.store)
    }

    /// Run one ingestion and record it in the catalog run log.
    ///
    /// With `rebuild` the vector store and source catalog are emptied once
    /// the corpus has loaded, and every source is embedded again. A run that
    /// fails before that point leaves the existing index untouched.
    #[inline]
    pub async fn run(&mut self, rebuild: bool) -> Result<IngestionReport> {
        let run = self.catalog.start_run(rebuild).await?;
        info!("Starting ingestion run {} (rebuild: {})", run.id, rebuild);

        let mut report = IngestionReport::default();
        match self.execute(rebuild, &mut report).await {
            Ok(()) => {
                self.state = IngestionState::Done;
                self.catalog
                    .finish_run(run.id, RunStatus::Done, &RunUpdate::from(&report))
                    .await?;
                info!(
                    "Ingestion complete: {} documents, {} unchanged sources, {} chunks, {} entries written",
                    report.documents,
                    report.skipped_unchanged,
                    report.chunks,
                    report.entries_written
                );
                Ok(report)
            }
            Err(err) => {
                error!("Ingestion failed while {}: {}", self.state, err);
                self.state = IngestionState::Failed {
                    error: err.to_string(),
                };
                let update = RunUpdate {
                    error_message: Some(err.to_string()),
                    ..RunUpdate::from(&report)
                };
                if let Err(log_err) = self
                    .catalog
                    .finish_run(run.id, RunStatus::Failed, &update)
                    .await
                {
                    warn!("Failed to record failed run {}: {}", run.id, log_err);
                }
                Err(err)
            }
        }
    }

    /// Fill `report` as the run progresses, so a failed run still records
    /// how far it got
    async fn execute(&mut self, rebuild: bool, report: &mut IngestionReport) -> Result<()> {
        self.check_embedder(rebuild).await?;

        self.state = IngestionState::Loading;
        let dirs = self.config.resolved_data_dirs();
        let documents = load_corpus(&dirs, &self.config.corpus)?;
        if documents.is_empty() {
            let searched = dirs.iter().map(|dir| dir.display()).join(", ");
            return Err(RagError::NoDocumentsFound(searched));
        }
        info!("Loaded {} documents", documents.len());
        report.documents = documents.len();

        if rebuild {
            info!("Rebuilding index from scratch");
            // Catalog first: a store left behind only costs a re-embed
            self.catalog.reset_index().await?;
            self.store
                .write()
                .await
                .reset_with_dimension(self.embedder.dimension())
                .await?;
        }

        self.state = IngestionState::Splitting;
        let (fresh, mut pending, skipped_unchanged) = self.select_changed(&documents).await?;
        report.skipped_unchanged = skipped_unchanged;
        let chunks = chunk_documents(&fresh, &self.config.chunking)?;
        report.chunks = chunks.len();
        for chunk in &chunks {
            if let Some(source) = pending.get_mut(&chunk.source) {
                source.chunk_count += 1;
            }
        }
        info!(
            "Split {} documents into {} chunks ({} unchanged sources skipped)",
            fresh.len(),
            chunks.len(),
            skipped_unchanged
        );

        if pending.is_empty() {
            info!("Every source is unchanged, nothing to embed");
            return Ok(());
        }

        self.state = IngestionState::Embedding;
        let vectors = self.embed_chunks(&chunks)?;

        self.state = IngestionState::Persisting;
        self.catalog
            .ensure_manifest(self.embedder.model_name(), self.embedder.dimension() as u32)
            .await?;

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let hash = pending
                    .get(&chunk.source)
                    .map_or("", |source| source.content_hash.as_str());
                IndexEntry::new(chunk, vector, hash)
            })
            .collect();
        let sources: Vec<NewIngestedSource> = pending
            .into_iter()
            .map(|(path, source)| NewIngestedSource {
                source_path: path.display().to_string(),
                content_hash: source.content_hash,
                kind: source.kind,
                chunk_count: source.chunk_count as i64,
            })
            .collect();

        // Hold the write lock until the catalog agrees with the store
        let mut store = self.store.write().await;
        let first_sequence = store.next_sequence();
        report.entries_written = store.insert(entries).await?;

        if let Err(err) = self.catalog.record_sources(sources).await {
            warn!(
                "Catalog update failed, removing the {} entries just written",
                report.entries_written
            );
            let rollback = store.remove_from(first_sequence).await;
            if let Err(rollback_err) = rollback {
                error!(
                    "Failed to remove entries after catalog failure: {}",
                    rollback_err
                );
            } else {
                report.entries_written = 0;
            }
            return Err(err);
        }

        Ok(())
    }

    /// The embedder must agree with the store and with the pinned model.
    /// Neither applies to a rebuild, which replaces both.
    async fn check_embedder(&self, rebuild: bool) -> Result<()> {
        if rebuild {
            return Ok(());
        }
        let store_dimension = self.store.read().await.dimension();
        if self.embedder.dimension() != store_dimension {
            return Err(RagError::Config(format!(
                "Embedder produces {}-dimensional vectors but the index stores {}",
                self.embedder.dimension(),
                store_dimension
            )));
        }
        self.catalog
            .verify_manifest(self.embedder.model_name(), self.embedder.dimension() as u32)
            .await
    }

    /// Keep documents whose source file changed since it was last ingested
    async fn select_changed(
        &self,
        documents: &[Document],
    ) -> Result<(Vec<Document>, BTreeMap<PathBuf, PendingSource>, usize)> {
        // Pages of one file are loaded consecutively
        let groups: Vec<(PathBuf, Vec<&Document>)> = documents
            .iter()
            .chunk_by(|document| document.source.clone())
            .into_iter()
            .map(|(source, group)| (source, group.collect()))
            .collect();

        let mut fresh = Vec::new();
        let mut pending = BTreeMap::new();
        let mut skipped_unchanged = 0;

        for (source, group) in groups {
            let content_hash = content_hash(&source)?;
            if self
                .catalog
                .is_source_unchanged(&source.display().to_string(), &content_hash)
                .await?
            {
                debug!("Unchanged, skipping: {}", source.display());
                skipped_unchanged += 1;
                continue;
            }

            let kind = group
                .first()
                .map_or("text", |document| document.kind.as_str())
                .to_string();
            fresh.extend(group.into_iter().cloned());
            pending.insert(
                source,
                PendingSource {
                    content_hash,
                    kind,
                    chunk_count: 0,
                },
            );
        }

        Ok((fresh, pending, skipped_unchanged))
    }

    /// Embed chunk texts batch by batch, in chunk order
    fn embed_chunks(&self, chunks: &[ContentChunk]) -> Result<Vec<Vec<f32>>> {
        let batch_size = (self.config.ollama.batch_size as usize).max(1);
        let bar = if self.show_progress {
            ProgressBar::new(chunks.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} Embedding chunks")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            )
        } else {
            ProgressBar::hidden()
        };

        let expected = self.embedder.dimension();
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
            let embedded = self.embedder.embed_batch(&texts)?;
            if embedded.len() != texts.len() {
                return Err(RagError::ModelUnavailable(format!(
                    "Embedder returned {} vectors for {} inputs",
                    embedded.len(),
                    texts.len()
                )));
            }
            for vector in &embedded {
                check_dimension(vector, expected)?;
            }
            vectors.extend(embedded);
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        debug!("Embedded {} chunks", vectors.len());
        Ok(vectors)
    }
}

/// Hex SHA-256 of a file's bytes
#[inline]
pub fn content_hash(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
