
use super::{ChunkMetadata, IndexEntry};
use crate::{RagError, Result, config::Config};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const TABLE_NAME: &str = "chunks";

/// How a missing table or a differing dimension is treated on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    /// Create a missing table, reject another dimension
    Create,
    /// Keep whatever table exists, of any dimension, until it is reset
    Rebuild,
    /// Never write to disk; a missing table is an error
    Existing,
}

fn index_not_built() -> RagError {
    RagError::Config(
        "Vector index has not been built yet; run `council-rag ingest` first".to_string(),
    )
}

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: usize,
    next_sequence: u64,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub metadata: ChunkMetadata,
    /// Insertion order of the entry, used to break similarity ties
    pub sequence: u64,
    /// `1 - distance`, higher is better
    pub similarity: f32,
    /// Cosine distance reported by LanceDB
    pub distance: f32,
}

impl VectorStore {
    /// Open the vector store configured for this installation
    ///
    /// # Arguments
    /// * `config` - Application configuration containing database paths and the pinned dimension
    ///
    /// # Returns
    /// * `Result<Self>` - Opened store, `Config` error on a dimension mismatch,
    ///   `IndexCorrupt` if the existing table cannot be read
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_at(
            &config.vector_database_path(),
            config.ollama.embedding_dimension as usize,
        )
        .await
    }

    /// Open the store ahead of a full rebuild.
    ///
    /// Nothing is deleted here. An existing table is kept with whatever
    /// dimension it was built with, and an unreadable one is tolerated, so
    /// that [`VectorStore::reset_with_dimension`] can replace it once the
    /// corpus has been loaded.
    #[inline]
    pub async fn open_for_rebuild(config: &Config) -> Result<Self> {
        Self::open_with(
            &config.vector_database_path(),
            config.ollama.embedding_dimension as usize,
            OpenMode::Rebuild,
        )
        .await
    }

    /// Open an index that must already exist, without creating anything.
    ///
    /// A missing index is a `Config` error telling the user to ingest first.
    #[inline]
    pub async fn open_existing(config: &Config) -> Result<Self> {
        Self::open_with(
            &config.vector_database_path(),
            config.ollama.embedding_dimension as usize,
            OpenMode::Existing,
        )
        .await
    }

    /// Open (or create) a store rooted at `path` with vectors of length `dimension`
    #[inline]
    pub async fn open_at(path: &Path, dimension: usize) -> Result<Self> {
        Self::open_with(path, dimension, OpenMode::Create).await
    }

    async fn open_with(path: &Path, dimension: usize, mode: OpenMode) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Config(
                "Embedding dimension must be positive".to_string(),
            ));
        }

        debug!("Initializing LanceDB at path: {:?}", path);
        if mode == OpenMode::Existing {
            if !path.exists() {
                return Err(index_not_built());
            }
        } else {
            std::fs::create_dir_all(path).map_err(|e| {
                RagError::Database(format!("Failed to create vector database directory: {}", e))
            })?;
        }

        let uri = path.display().to_string();
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            RagError::IndexCorrupt(format!("Failed to connect to LanceDB at {}: {}", uri, e))
        })?;

        let mut store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: dimension,
            next_sequence: 0,
        };
        store.initialize_table(mode).await?;

        info!(
            "Vector store opened with {} entries ({} dimensions)",
            store.next_sequence, store.vector_dimension
        );
        Ok(store)
    }

    /// Create the table if it is missing, otherwise check its schema
    async fn initialize_table(&mut self, mode: OpenMode) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to list tables: {}", e)))?;

        if !table_names.contains(&self.table_name) {
            if mode == OpenMode::Existing {
                return Err(index_not_built());
            }
            self.create_table().await?;
            self.next_sequence = 0;
            return Ok(());
        }

        let existing = match self.detect_existing_vector_dimension().await {
            Ok(existing) => existing,
            Err(e) if mode == OpenMode::Rebuild => {
                warn!("Existing index is unreadable and will be replaced: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if existing != self.vector_dimension {
            if mode != OpenMode::Rebuild {
                return Err(RagError::Config(format!(
                    "Index was built with {}-dimensional embeddings but {} are configured; \
                     run `ingest --rebuild` after changing the embedding model",
                    existing, self.vector_dimension
                )));
            }
            info!(
                "Keeping {}-dimensional index until the rebuild replaces it",
                existing
            );
            self.vector_dimension = existing;
        }

        let table = self.open_table().await?;
        let rows = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to count rows: {}", e)))?;
        self.next_sequence = self.max_sequence(&table, rows).await?;
        Ok(())
    }

    async fn create_table(&self) -> Result<()> {
        info!(
            "Creating {} table with {} dimensions",
            self.table_name, self.vector_dimension
        );
        self.connection
            .create_empty_table(&self.table_name, Self::create_schema(self.vector_dimension))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;
        Ok(())
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to open table: {}", e)))
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to get table schema: {}", e)))?;

        for field in schema.fields() {
            if field.name() == "vector" {
                if let DataType::FixedSizeList(_, size) = field.data_type() {
                    return usize::try_from(*size).map_err(|_| {
                        RagError::IndexCorrupt(format!("Invalid vector dimension {}", size))
                    });
                }
            }
        }

        Err(RagError::IndexCorrupt(
            "Could not find vector column or determine dimension".to_string(),
        ))
    }

    /// Next free sequence number: one past the largest stored
    async fn max_sequence(&self, table: &Table, rows: usize) -> Result<u64> {
        if rows == 0 {
            return Ok(0);
        }

        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["sequence"]))
            .execute()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to scan sequences: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to read sequences: {}", e)))?;

        let mut next = 0;
        for batch in &batches {
            let sequences = column::<UInt64Array>(batch, "sequence")?;
            for row in 0..sequences.len() {
                next = next.max(sequences.value(row) + 1);
            }
        }
        Ok(next)
    }

    /// Schema of the chunks table for vectors of `vector_dim` components
    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("sequence", DataType::UInt64, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("page", DataType::UInt32, true),
            Field::new("title", DataType::Utf8, true),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("start_offset", DataType::UInt64, false),
            Field::new("end_offset", DataType::UInt64, false),
            Field::new("token_count", DataType::UInt32, false),
            Field::new("content_hash", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.vector_dimension
    }

    /// Sequence number the next inserted entry will receive
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append entries and commit them
    ///
    /// Every vector is checked against the store dimension before anything
    /// is written.
    ///
    /// # Returns
    /// * `Result<u64>` - Number of entries written
    #[inline]
    pub async fn insert(&mut self, entries: Vec<IndexEntry>) -> Result<u64> {
        if entries.is_empty() {
            debug!("No entries to store");
            return Ok(0);
        }

        for entry in &entries {
            crate::embeddings::check_dimension(&entry.vector, self.vector_dimension)?;
        }

        let count = entries.len() as u64;
        let record_batch = self.create_record_batch(&entries, self.next_sequence)?;
        let table = self.open_table().await?;

        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert entries: {}", e)))?;

        self.next_sequence += count;
        info!("Stored {} entries", count);
        Ok(count)
    }

    /// Create a RecordBatch from entries, numbering them from `first_sequence`
    fn create_record_batch(
        &self,
        entries: &[IndexEntry],
        first_sequence: u64,
    ) -> Result<RecordBatch> {
        let len = entries.len();
        let vector_dim = self.vector_dimension;

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut sequences = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut sources = Vec::with_capacity(len);
        let mut kinds = Vec::with_capacity(len);
        let mut pages = Vec::with_capacity(len);
        let mut titles = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut start_offsets = Vec::with_capacity(len);
        let mut end_offsets = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);
        let mut content_hashes = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for (sequence, entry) in (first_sequence..).zip(entries) {
            let metadata = &entry.metadata;
            ids.push(entry.id.as_str());
            flat_values.extend_from_slice(&entry.vector);
            sequences.push(sequence);
            contents.push(metadata.content.as_str());
            sources.push(metadata.source.as_str());
            kinds.push(metadata.kind.as_str());
            pages.push(metadata.page);
            titles.push(metadata.title.as_deref());
            chunk_indices.push(metadata.chunk_index);
            start_offsets.push(metadata.start_offset);
            end_offsets.push(metadata.end_offset);
            token_counts.push(metadata.token_count);
            content_hashes.push(metadata.content_hash.as_str());
            created_ats.push(metadata.created_at.as_str());
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            vector_dim as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(UInt64Array::from(sequences)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(kinds)),
            Arc::new(UInt32Array::from(pages)),
            Arc::new(StringArray::from(titles)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(UInt64Array::from(start_offsets)),
            Arc::new(UInt64Array::from(end_offsets)),
            Arc::new(UInt32Array::from(token_counts)),
            Arc::new(StringArray::from(content_hashes)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Exact cosine search over every stored entry
    ///
    /// Results are ordered by descending similarity, ties broken by
    /// ascending insertion sequence. When fewer than `k` entries exist all
    /// of them are returned.
    ///
    /// # Arguments
    /// * `query_vector` - The query vector to search for
    /// * `k` - Maximum number of results to return, at least 1
    #[inline]
    pub async fn query(&self, query_vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 {
            return Err(RagError::Config(
                "Number of results to retrieve must be at least 1".to_string(),
            ));
        }
        crate::embeddings::check_dimension(query_vector, self.vector_dimension)?;

        let table = self.open_table().await?;
        let total = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to count rows: {}", e)))?;
        if total == 0 {
            debug!("Query against empty index");
            return Ok(Vec::new());
        }

        debug!("Searching {} entries for top {}", total, k);

        // Scan every row so ties can be ordered by sequence before truncating
        let results = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .bypass_vector_index()
            .limit(total)
            .execute()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to execute search: {}", e)))?;

        let mut search_results = Self::parse_search_results_stream(results).await?;
        search_results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.sequence.cmp(&b.sequence))
        });
        search_results.truncate(k);
        Ok(search_results)
    }

    /// Parse search results from LanceDB stream into SearchResult structs
    async fn parse_search_results_stream(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>> {
        let mut search_results = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let sequences = column::<UInt64Array>(batch, "sequence")?;
        let contents = column::<StringArray>(batch, "content")?;
        let sources = column::<StringArray>(batch, "source")?;
        let kinds = column::<StringArray>(batch, "kind")?;
        let pages = column::<UInt32Array>(batch, "page")?;
        let titles = column::<StringArray>(batch, "title")?;
        let chunk_indices = column::<UInt32Array>(batch, "chunk_index")?;
        let start_offsets = column::<UInt64Array>(batch, "start_offset")?;
        let end_offsets = column::<UInt64Array>(batch, "end_offset")?;
        let token_counts = column::<UInt32Array>(batch, "token_count")?;
        let content_hashes = column::<StringArray>(batch, "content_hash")?;
        let created_ats = column::<StringArray>(batch, "created_at")?;
        let distances = column::<Float32Array>(batch, "_distance")?;

        let mut search_results = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let metadata = ChunkMetadata {
                content: contents.value(row).to_string(),
                source: sources.value(row).to_string(),
                kind: kinds.value(row).to_string(),
                page: (!pages.is_null(row)).then(|| pages.value(row)),
                title: (!titles.is_null(row)).then(|| titles.value(row).to_string()),
                chunk_index: chunk_indices.value(row),
                start_offset: start_offsets.value(row),
                end_offset: end_offsets.value(row),
                token_count: token_counts.value(row),
                content_hash: content_hashes.value(row).to_string(),
                created_at: created_ats.value(row).to_string(),
            };

            let distance = if distances.is_null(row) {
                f32::MAX
            } else {
                distances.value(row)
            };

            search_results.push(SearchResult {
                metadata,
                sequence: sequences.value(row),
                similarity: 1.0 - distance,
                distance,
            });
        }

        Ok(search_results)
    }

    /// Get the total number of entries stored
    #[inline]
    pub async fn count(&self) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to count rows: {}", e)))?;
        Ok(count as u64)
    }

    /// Distinct source paths present in the index, sorted
    #[inline]
    pub async fn sources(&self) -> Result<Vec<String>> {
        let table = self.open_table().await?;
        let batches: Vec<RecordBatch> = table
            .query()
            .select(Select::columns(&["source"]))
            .execute()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to scan sources: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| RagError::IndexCorrupt(format!("Failed to read sources: {}", e)))?;

        let mut sources = BTreeSet::new();
        for batch in &batches {
            let column = column::<StringArray>(batch, "source")?;
            for row in 0..column.len() {
                sources.insert(column.value(row).to_string());
            }
        }
        Ok(sources.into_iter().collect())
    }

    /// Drop every entry and recreate an empty table
    #[inline]
    pub async fn reset(&mut self) -> Result<()> {
        self.reset_with_dimension(self.vector_dimension).await
    }

    /// Drop every entry and recreate the table for vectors of `dimension`
    #[inline]
    pub async fn reset_with_dimension(&mut self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(RagError::Config(
                "Embedding dimension must be positive".to_string(),
            ));
        }

        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables for drop: {}", e)))?;

        if table_names.contains(&self.table_name) {
            info!("Dropping {} table", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
        }

        self.vector_dimension = dimension;
        self.create_table().await?;
        self.next_sequence = 0;
        Ok(())
    }

    /// Delete every entry numbered `first_sequence` or later
    ///
    /// Undoes the inserts made since [`VectorStore::next_sequence`] returned
    /// `first_sequence`.
    #[inline]
    pub async fn remove_from(&mut self, first_sequence: u64) -> Result<()> {
        let table = self.open_table().await?;
        let predicate = format!("sequence >= {}", first_sequence);
        table
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete entries: {}", e)))?;

        info!("Removed entries from sequence {}", first_sequence);
        self.next_sequence = first_sequence;
        Ok(())
    }
}

/// Look up a column by name and downcast it to its arrow array type
fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::IndexCorrupt(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::IndexCorrupt(format!("Invalid {} column type", name)))
}
