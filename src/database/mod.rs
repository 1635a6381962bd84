pub mod backends;
pub mod cache;

pub use backends::{MemoryBackend, SledBackend, SqliteBackend};
pub use cache::{AnalysisCacheManager, CacheStats, PhotoAnalysisResult};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Path error: {0}")]
    Path(String),
}

/// Durable key/value storage behind the analysis cache.
///
/// Keys are opaque strings; empty keys and arbitrary characters must
/// round-trip unchanged. Callers serialize access, so implementations only
/// need to be `Send`.
pub trait CacheBackend: Send {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError>;

    fn put(&mut self, key: &str, value: &[u8]) -> Result<(), DatabaseError>;

    /// Writes entries in order, so a repeated key ends with its last value.
    fn put_many(&mut self, entries: &[(String, Vec<u8>)]) -> Result<(), DatabaseError> {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), DatabaseError>;

    fn clear(&mut self) -> Result<(), DatabaseError>;

    fn len(&self) -> Result<usize, DatabaseError>;

    fn keys(&self) -> Result<Vec<String>, DatabaseError>;

    fn flush(&mut self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    Memory,
    Sled,
    Sqlite,
}

/// Default on-disk cache location, `~/Documents/Sweeprs/analysis-cache`.
pub fn get_cache_path() -> Result<PathBuf, DatabaseError> {
    let home_dir = dirs::home_dir()
        .ok_or_else(|| DatabaseError::Path("Could not find home directory".to_string()))?;

    let app_dir = home_dir.join("Documents").join("Sweeprs");
    std::fs::create_dir_all(&app_dir)?;

    Ok(app_dir.join("analysis-cache"))
}
