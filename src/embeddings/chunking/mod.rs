
use std::path::PathBuf;
use std::sync::LazyLock;

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::{Document, DocumentKind};
use crate::{RagError, Result};

/// Sentence terminator, optional closing quote or bracket, then whitespace
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]*\s"#).expect("valid regex"));

/// Represents a chunk of a document ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// Exact substring of the parent document text
    pub content: String,
    pub source: PathBuf,
    pub kind: DocumentKind,
    pub page: Option<u32>,
    pub title: Option<String>,
    /// The index of this chunk within its document
    pub chunk_index: usize,
    /// Byte offset of the chunk start in the document text
    pub start_offset: usize,
    /// Byte offset one past the chunk end in the document text
    pub end_offset: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for content chunking, measured in characters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks of one document
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 150,
        }
    }
}

/// Chunk every document, preserving document order
#[inline]
pub fn chunk_documents(
    documents: &[Document],
    config: &ChunkingConfig,
) -> Result<Vec<ContentChunk>> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_document(document, config)?);
    }
    Ok(chunks)
}

/// Chunk a single document into overlapping windows
#[inline]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<ContentChunk>> {
    let spans = split_text(&document.text, config.chunk_size, config.chunk_overlap)?;

    let chunks: Vec<ContentChunk> = spans
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (start_offset, end_offset))| {
            let content = document
                .text
                .get(start_offset..end_offset)
                .unwrap_or_default()
                .to_string();
            let token_count = estimate_token_count(&content);
            ContentChunk {
                content,
                source: document.source.clone(),
                kind: document.kind,
                page: document.page,
                title: document.title.clone(),
                chunk_index,
                start_offset,
                end_offset,
                token_count,
            }
        })
        .collect();

    debug!(
        "Chunked {} into {} chunks",
        document.source.display(),
        chunks.len()
    );

    Ok(chunks)
}

/// Split `text` into byte spans of at most `chunk_size` characters where
/// consecutive spans share `chunk_overlap` characters.
///
/// Break points prefer paragraph breaks, then line breaks, then sentence
/// ends, then any whitespace, before falling back to a hard cut. The first
/// span starts at 0 and the last ends at `text.len()`.
#[inline]
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Result<Vec<(usize, usize)>> {
    if chunk_size == 0 || chunk_overlap >= chunk_size {
        return Err(RagError::Config(format!(
            "Chunk overlap ({}) must be smaller than chunk size ({})",
            chunk_overlap, chunk_size
        )));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char, plus the end of the text
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = offsets.len() - 1;

    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        if char_count - start <= chunk_size {
            spans.push((offsets[start], text.len()));
            break;
        }

        let window_end = start + chunk_size;
        let min_end = start + (chunk_overlap + 1).max(chunk_size / 3);
        let end = find_break(text, &offsets, start, min_end, window_end);

        spans.push((offsets[start], offsets[end]));
        start = end - chunk_overlap;
    }

    Ok(spans)
}

/// Pick the chunk end (a char index in `min_end..=window_end`) for a window starting at `start`
fn find_break(
    text: &str,
    offsets: &[usize],
    start: usize,
    min_end: usize,
    window_end: usize,
) -> usize {
    let window_start_byte = offsets[start];
    let window = text
        .get(window_start_byte..offsets[window_end])
        .unwrap_or_default();
    let min_end_byte = offsets[min_end];

    let to_char_index = |relative_byte: usize| {
        offsets
            .binary_search(&(window_start_byte + relative_byte))
            .ok()
            .filter(|&index| index >= min_end)
    };

    let paragraph = window.rfind("\n\n").map(|pos| pos + 2);
    let line = window.rfind('\n').map(|pos| pos + 1);
    let sentence = SENTENCE_END
        .find_iter(window)
        .filter_map(std::result::Result::ok)
        .last()
        .map(|m| m.end());
    let whitespace = window
        .char_indices()
        .rev()
        .find(|(_, ch)| ch.is_whitespace())
        .map(|(pos, ch)| pos + ch.len_utf8());

    [paragraph, line, sentence, whitespace]
        .into_iter()
        .flatten()
        .filter(|&relative| window_start_byte + relative >= min_end_byte)
        .find_map(to_char_index)
        .unwrap_or(window_end)
}

/// Rebuild the text of one document from its chunks by dropping the overlapping prefixes
#[inline]
pub fn reassemble(chunks: &[ContentChunk]) -> String {
    let mut text = String::new();
    let mut covered: usize = 0;

    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start_offset);
        text.push_str(chunk.content.get(skip..).unwrap_or_default());
        covered = covered.max(chunk.end_offset);
    }

    text
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
