// Database module
// SQLite catalog for ingestion bookkeeping, LanceDB for vectors

pub mod lancedb;
pub mod sqlite;

pub use self::lancedb::{ChunkMetadata, IndexEntry, SearchResult, VectorStore};
pub use sqlite::Database;
