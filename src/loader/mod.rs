//! Document loading for the council corpus.
//!
//! Each configured directory is scanned (non-recursively, in path order) for
//! `pdf`, `md`, `txt` and `json` files. Files are read lazily as the
//! [`DirectoryLoader`] iterator advances.


use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};
use tracing::{debug, info, warn};

use crate::config::CorpusConfig;
use crate::{RagError, Result};

/// A unit of loaded text together with where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub source: PathBuf,
    pub kind: DocumentKind,
    /// 1-based page number for PDF pages
    pub page: Option<u32>,
    /// First heading of a Markdown file
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Pdf,
    Markdown,
    Text,
    Json,
}

impl DocumentKind {
    /// Classify a path by extension, ignoring case
    #[inline]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "md" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Json => "json",
        }
    }

    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pdf" => Some(Self::Pdf),
            "markdown" => Some(Self::Markdown),
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

impl fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lazily yields the documents of every supported file in one directory
pub struct DirectoryLoader {
    files: std::vec::IntoIter<PathBuf>,
    pending: VecDeque<Document>,
    json_pointer: Option<String>,
}

impl DirectoryLoader {
    /// Prepare a loader for `dir`.
    ///
    /// A missing directory yields nothing and logs a warning, unless
    /// `require_directories` is set, in which case it is a configuration error.
    #[inline]
    pub fn new(dir: &Path, corpus: &CorpusConfig) -> Result<Self> {
        let files = if dir.is_dir() {
            list_supported_files(dir)?
        } else if corpus.require_directories {
            return Err(RagError::Config(format!(
                "Data directory does not exist: {}",
                dir.display()
            )));
        } else {
            warn!("Data directory does not exist, skipping: {}", dir.display());
            Vec::new()
        };

        debug!("Found {} supported files in {}", files.len(), dir.display());

        Ok(Self {
            files: files.into_iter(),
            pending: VecDeque::new(),
            json_pointer: corpus.json_pointer.clone(),
        })
    }
}

impl Iterator for DirectoryLoader {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(document) = self.pending.pop_front() {
                return Some(Ok(document));
            }

            let path = self.files.next()?;
            match load_file(&path, self.json_pointer.as_deref()) {
                Ok(documents) => self.pending.extend(documents),
                Err(e) => return Some(Err(RagError::Other(e))),
            }
        }
    }
}

/// Load every configured data directory.
///
/// Files that fail to load are logged and skipped; only configuration
/// problems abort the load.
#[inline]
pub fn load_corpus(dirs: &[PathBuf], corpus: &CorpusConfig) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for dir in dirs {
        info!("Loading documents from {}", dir.display());
        let before = documents.len();

        for document in DirectoryLoader::new(dir, corpus)? {
            match document {
                Ok(document) => documents.push(document),
                Err(e) => warn!("Skipping unreadable file: {}", e),
            }
        }

        info!(
            "Loaded {} documents from {}",
            documents.len() - before,
            dir.display()
        );
    }

    Ok(documents)
}

fn list_supported_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        if DocumentKind::from_path(&path).is_some() {
            files.push(path);
        } else {
            debug!("Skipping unsupported file: {}", path.display());
        }
    }

    files.sort();
    Ok(files)
}

fn load_file(path: &Path, json_pointer: Option<&str>) -> anyhow::Result<Vec<Document>> {
    let kind = DocumentKind::from_path(path)
        .ok_or_else(|| anyhow!("Unsupported file type: {}", path.display()))?;

    let documents = match kind {
        DocumentKind::Pdf => load_pdf(path)?,
        DocumentKind::Markdown | DocumentKind::Text => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = if kind == DocumentKind::Markdown {
                markdown_title(&text)
            } else {
                None
            };
            vec![Document {
                text,
                source: path.to_path_buf(),
                kind,
                page: None,
                title,
            }]
        }
        DocumentKind::Json => load_json(path, json_pointer)?.into_iter().collect(),
    };

    debug!(
        "Loaded {} documents from {}",
        documents.len(),
        path.display()
    );
    Ok(documents)
}

fn load_pdf(path: &Path) -> anyhow::Result<Vec<Document>> {
    let pdf = lopdf::Document::load(path)
        .with_context(|| format!("Failed to open PDF {}", path.display()))?;

    let mut documents = Vec::new();
    for page_number in pdf.get_pages().into_keys() {
        let text = pdf.extract_text(&[page_number]).with_context(|| {
            format!(
                "Failed to extract text from page {} of {}",
                page_number,
                path.display()
            )
        })?;

        if text.trim().is_empty() {
            debug!("Page {} of {} has no text", page_number, path.display());
            continue;
        }

        documents.push(Document {
            text,
            source: path.to_path_buf(),
            kind: DocumentKind::Pdf,
            page: Some(page_number),
            title: None,
        });
    }

    Ok(documents)
}

fn load_json(path: &Path, json_pointer: Option<&str>) -> anyhow::Result<Option<Document>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse JSON {}", path.display()))?;

    let selected = match json_pointer {
        Some(pointer) => match value.pointer(pointer) {
            Some(selected) => selected,
            None => {
                warn!(
                    "JSON pointer {} does not resolve in {}, skipping",
                    pointer,
                    path.display()
                );
                return Ok(None);
            }
        },
        None => &value,
    };

    let text = serde_json::to_string_pretty(selected)
        .with_context(|| format!("Failed to render JSON {}", path.display()))?;

    Ok(Some(Document {
        text,
        source: path.to_path_buf(),
        kind: DocumentKind::Json,
        page: None,
        title: None,
    }))
}

/// Text of the first heading in a Markdown document
fn markdown_title(markdown: &str) -> Option<String> {
    let mut in_heading = false;
    let mut title = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Start(Tag::Heading { .. }) => in_heading = true,
            Event::End(TagEnd::Heading(_)) => {
                let trimmed = title.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
                in_heading = false;
            }
            Event::Text(text) | Event::Code(text) if in_heading => title.push_str(&text),
            _ => {}
        }
    }

    None
}
