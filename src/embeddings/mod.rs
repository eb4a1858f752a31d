// Embeddings module
// Character chunking plus the embedding backend interface

pub mod chunking;

pub use chunking::{
    ChunkingConfig, ContentChunk, chunk_document, chunk_documents, estimate_token_count,
    reassemble, split_text,
};

use crate::{RagError, Result};

/// Maps text to fixed-dimension vectors.
///
/// Implementations must be deterministic for a fixed model, and
/// `embed_batch` must return the same vectors as repeated `embed_query`
/// calls. An unreachable backend is reported as [`RagError::ModelUnavailable`].
pub trait Embedder: Send + Sync {
    /// Identity of the embedding model, recorded alongside the index
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder produces
    fn dimension(&self) -> usize;

    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Reject vectors whose length differs from the pinned dimension
#[inline]
pub fn check_dimension(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() == expected {
        Ok(())
    } else {
        Err(RagError::Config(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            expected,
            vector.len()
        )))
    }
}
