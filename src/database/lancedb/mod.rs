// LanceDB vector database module
// Handles vector storage and similarity search for chunk embeddings


pub mod vector_store;

pub use vector_store::{SearchResult, VectorStore};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embeddings::ContentChunk;
use crate::loader::DocumentKind;

/// Entry appended to the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Unique identifier for this entry
    pub id: String,
    /// The embedding of `metadata.content`
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// Metadata for a chunk stored alongside its embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The chunk text
    pub content: String,
    /// Path of the source file
    pub source: String,
    /// One of `pdf`, `markdown`, `text`, `json`
    pub kind: String,
    pub page: Option<u32>,
    pub title: Option<String>,
    /// Index of this chunk within its document
    pub chunk_index: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    pub token_count: u32,
    /// SHA-256 of the source file contents at ingestion time
    pub content_hash: String,
    /// Timestamp when this entry was created
    pub created_at: String,
}

impl IndexEntry {
    #[inline]
    pub fn new(chunk: &ContentChunk, vector: Vec<f32>, content_hash: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            metadata: ChunkMetadata {
                content: chunk.content.clone(),
                source: chunk.source.display().to_string(),
                kind: chunk.kind.as_str().to_string(),
                page: chunk.page,
                title: chunk.title.clone(),
                chunk_index: u32::try_from(chunk.chunk_index).unwrap_or(u32::MAX),
                start_offset: chunk.start_offset as u64,
                end_offset: chunk.end_offset as u64,
                token_count: u32::try_from(chunk.token_count).unwrap_or(u32::MAX),
                content_hash: content_hash.to_string(),
                created_at: Utc::now().to_rfc3339(),
            },
        }
    }
}

impl ChunkMetadata {
    #[inline]
    pub fn document_kind(&self) -> Option<DocumentKind> {
        DocumentKind::parse(&self.kind)
    }

    /// Short human readable location, e.g. `agenda.pdf (page 3)`
    #[inline]
    pub fn citation(&self) -> String {
        let name = std::path::Path::new(&self.source)
            .file_name()
            .map_or_else(|| self.source.clone(), |n| n.to_string_lossy().to_string());
        match self.page {
            Some(page) => format!("{} (page {})", name, page),
            None => name,
        }
    }
}
