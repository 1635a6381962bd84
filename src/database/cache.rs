use super::{
    CacheBackend, CacheBackendKind, DatabaseError, MemoryBackend, SledBackend, SqliteBackend,
};
use crate::core::blur::BlurDetectionResult;
use crate::core::face::FaceDetectionResult;
use crate::core::models::AssetId;
use crate::core::quality::PhotoQualityScore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Everything known about one photo from a previous analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAnalysisResult {
    pub photo_id: AssetId,
    pub analyzed_at: DateTime<Utc>,
    #[serde(default)]
    pub blur: Option<BlurDetectionResult>,
    #[serde(default)]
    pub faces: Option<FaceDetectionResult>,
    #[serde(default)]
    pub quality: Option<PhotoQualityScore>,
}

impl PhotoAnalysisResult {
    pub fn new(photo_id: impl Into<AssetId>) -> Self {
        Self {
            photo_id: photo_id.into(),
            analyzed_at: Utc::now(),
            blur: None,
            faces: None,
            quality: None,
        }
    }

    pub fn with_blur(mut self, blur: BlurDetectionResult) -> Self {
        self.blur = Some(blur);
        self
    }

    pub fn with_faces(mut self, faces: FaceDetectionResult) -> Self {
        self.faces = Some(faces);
        self
    }

    pub fn with_quality(mut self, quality: PhotoQualityScore) -> Self {
        self.quality = Some(quality);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub with_blur: usize,
    pub with_faces: usize,
    pub with_quality: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Thread-safe store of [`PhotoAnalysisResult`]s keyed by photo id.
///
/// Entries are serialized as JSON and kept in whichever [`CacheBackend`] the
/// manager was opened with. Every operation takes the same lock, so a
/// `save_many` is never interleaved with another write.
pub struct AnalysisCacheManager {
    backend: Mutex<Box<dyn CacheBackend>>,
}

impl AnalysisCacheManager {
    pub fn new(backend: Box<dyn CacheBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    pub fn open_sled<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Ok(Self::new(Box::new(SledBackend::open(path)?)))
    }

    pub fn open_sqlite<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Ok(Self::new(Box::new(SqliteBackend::open(path)?)))
    }

    pub fn open(kind: CacheBackendKind, path: &Path) -> Result<Self, DatabaseError> {
        match kind {
            CacheBackendKind::Memory => Ok(Self::in_memory()),
            CacheBackendKind::Sled => Self::open_sled(path),
            CacheBackendKind::Sqlite => Self::open_sqlite(path),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn CacheBackend>>, DatabaseError> {
        self.backend.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    pub fn save(&self, result: &PhotoAnalysisResult) -> Result<(), DatabaseError> {
        let payload = serde_json::to_vec(result)?;
        self.lock()?.put(&result.photo_id, &payload)
    }

    /// Saves all results under a single lock. For duplicate ids the last one
    /// wins, exactly as if each had been passed to [`save`](Self::save).
    pub fn save_many(&self, results: &[PhotoAnalysisResult]) -> Result<(), DatabaseError> {
        if results.is_empty() {
            return Ok(());
        }
        let entries = results
            .iter()
            .map(|r| Ok((r.photo_id.clone(), serde_json::to_vec(r)?)))
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let mut backend = self.lock()?;
        backend.put_many(&entries)?;
        log::debug!("Cached {} analysis results", entries.len());
        Ok(())
    }

    pub fn load(&self, photo_id: &str) -> Result<Option<PhotoAnalysisResult>, DatabaseError> {
        let payload = self.lock()?.get(photo_id)?;
        match payload {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, photo_id: &str) -> Result<(), DatabaseError> {
        self.lock()?.remove(photo_id)
    }

    pub fn clear(&self) -> Result<(), DatabaseError> {
        self.lock()?.clear()
    }

    pub fn size(&self) -> Result<usize, DatabaseError> {
        self.lock()?.len()
    }

    pub fn keys(&self) -> Result<Vec<String>, DatabaseError> {
        self.lock()?.keys()
    }

    pub fn flush(&self) -> Result<(), DatabaseError> {
        self.lock()?.flush()
    }

    /// Drops entries analyzed more than `days` days ago. Returns how many
    /// were removed.
    pub fn prune_older_than(&self, days: i64) -> Result<usize, DatabaseError> {
        self.prune_older_than_at(days, Utc::now())
    }

    pub fn prune_older_than_at(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        let cutoff = now - Duration::days(days.max(0));
        let mut backend = self.lock()?;

        let mut removed = 0;
        for key in backend.keys()? {
            let Some(bytes) = backend.get(&key)? else {
                continue;
            };
            let stale = match serde_json::from_slice::<PhotoAnalysisResult>(&bytes) {
                Ok(entry) => entry.analyzed_at < cutoff,
                Err(e) => {
                    log::warn!("Dropping unreadable cache entry {}: {}", key, e);
                    true
                }
            };
            if stale {
                backend.remove(&key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            log::info!("Pruned {} cache entries older than {} days", removed, days);
        }
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats, DatabaseError> {
        let backend = self.lock()?;
        let mut stats = CacheStats::default();

        for key in backend.keys()? {
            let Some(bytes) = backend.get(&key)? else {
                continue;
            };
            let entry: PhotoAnalysisResult = match serde_json::from_slice(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable cache entry {}: {}", key, e);
                    continue;
                }
            };
            stats.entries += 1;
            stats.with_blur += entry.blur.is_some() as usize;
            stats.with_faces += entry.faces.is_some() as usize;
            stats.with_quality += entry.quality.is_some() as usize;
            let at = entry.analyzed_at;
            stats.oldest = Some(stats.oldest.map_or(at, |t| t.min(at)));
            stats.newest = Some(stats.newest.map_or(at, |t| t.max(at)));
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for AnalysisCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCacheManager").finish_non_exhaustive()
    }
}
