
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Embedding model the index was built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IndexManifest {
    pub embedding_model: String,
    pub embedding_dimension: i64,
    pub created_date: DateTime<Utc>,
}

impl IndexManifest {
    #[inline]
    pub fn matches(&self, model: &str, dimension: u32) -> bool {
        self.embedding_model == model && self.embedding_dimension == i64::from(dimension)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IngestedSource {
    pub source_path: String,
    /// Hex SHA-256 of the file contents
    pub content_hash: String,
    pub kind: String,
    pub chunk_count: i64,
    pub indexed_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewIngestedSource {
    pub source_path: String,
    pub content_hash: String,
    pub kind: String,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
}

impl std::fmt::Display for RunStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Done => write!(f, "Done"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct IngestionRun {
    pub id: i64,
    pub started_date: DateTime<Utc>,
    pub finished_date: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub rebuild: bool,
    pub documents: i64,
    pub skipped_unchanged: i64,
    pub chunks: i64,
    pub entries_written: i64,
    pub error_message: Option<String>,
}

/// Final counters of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunUpdate {
    pub documents: i64,
    pub skipped_unchanged: i64,
    pub chunks: i64,
    pub entries_written: i64,
    pub error_message: Option<String>,
}

impl IngestionRun {
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.status != RunStatus::Running
    }

    /// Wall-clock duration, if the run has finished
    #[inline]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_date
            .map(|finished| finished - self.started_date)
    }
}
