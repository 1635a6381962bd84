use crate::error::{AnalysisError, AnalysisResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type AssetId = String;

/// Fixed-length embedding produced by the feature extractor.
///
/// The dimension is whatever the extractor emits (512 and 2048 are common);
/// nothing in the engine assumes a particular size. The buffer is shared so
/// that several stages can read the same vector without copying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: Arc<[f32]>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> AnalysisResult<Self> {
        if values.is_empty() {
            return Err(AnalysisError::invalid_input("feature vector is empty"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AnalysisError::invalid_input(
                "feature vector contains non-finite values",
            ));
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Decode a little-endian f32 buffer. The length must be a positive
    /// multiple of 4 bytes.
    pub fn from_bytes(bytes: &[u8]) -> AnalysisResult<Self> {
        let values = decode_f32_buffer(bytes)?;
        Self::new(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.values)
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Reads a raw float buffer, rejecting empty and misaligned lengths.
pub(crate) fn decode_f32_buffer(bytes: &[u8]) -> AnalysisResult<Vec<f32>> {
    if bytes.is_empty() {
        return Err(AnalysisError::invalid_input("buffer is empty"));
    }
    if bytes.len() % 4 != 0 {
        return Err(AnalysisError::invalid_input(format!(
            "buffer length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
    Audio,
    Unknown,
}

impl From<String> for MediaType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            "audio" => MediaType::Audio,
            _ => MediaType::Unknown,
        }
    }
}

impl From<MediaType> for String {
    fn from(media_type: MediaType) -> Self {
        match media_type {
            MediaType::Image => "image".to_string(),
            MediaType::Video => "video".to_string(),
            MediaType::Audio => "audio".to_string(),
            MediaType::Unknown => "unknown".to_string(),
        }
    }
}

/// Asset metadata as supplied by the asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub id: AssetId,
    pub media_type: MediaType,
    #[serde(default)]
    pub is_screenshot: bool,
    /// Front-camera / selfie hint from the store, if it knows.
    #[serde(default)]
    pub is_selfie: Option<bool>,
    #[serde(default)]
    pub pixel_size: Option<(u32, u32)>,
    /// Duration in seconds; zero for stills.
    #[serde(default)]
    pub duration: f64,
    pub file_size: i64,
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,
}

impl AssetDescriptor {
    pub fn image(id: impl Into<AssetId>, file_size: i64) -> Self {
        Self {
            id: id.into(),
            media_type: MediaType::Image,
            is_screenshot: false,
            is_selfie: None,
            pixel_size: None,
            duration: 0.0,
            file_size,
            creation_date: None,
        }
    }

    pub fn video(id: impl Into<AssetId>, file_size: i64, duration: f64) -> Self {
        Self {
            media_type: MediaType::Video,
            duration,
            ..Self::image(id, file_size)
        }
    }

    pub fn screenshot(id: impl Into<AssetId>, file_size: i64) -> Self {
        Self {
            is_screenshot: true,
            ..Self::image(id, file_size)
        }
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn is_photo(&self) -> bool {
        self.media_type == MediaType::Image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    Similar,
    Screenshot,
    Selfie,
    Blurry,
    LargeVideo,
    Duplicate,
}

impl GroupType {
    pub const ALL: [GroupType; 6] = [
        GroupType::Similar,
        GroupType::Screenshot,
        GroupType::Selfie,
        GroupType::Blurry,
        GroupType::LargeVideo,
        GroupType::Duplicate,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            GroupType::Similar => "similar",
            GroupType::Screenshot => "screenshot",
            GroupType::Selfie => "selfie",
            GroupType::Blurry => "blurry",
            GroupType::LargeVideo => "large_video",
            GroupType::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for GroupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoGroup {
    pub group_type: GroupType,
    pub photo_ids: Vec<AssetId>,
    pub file_sizes: Vec<i64>,
    pub best_shot_index: Option<usize>,
}

impl PhotoGroup {
    pub fn new(
        group_type: GroupType,
        photo_ids: Vec<AssetId>,
        file_sizes: Vec<i64>,
    ) -> AnalysisResult<Self> {
        if photo_ids.len() != file_sizes.len() {
            return Err(AnalysisError::invalid_input(format!(
                "{} photo ids but {} file sizes",
                photo_ids.len(),
                file_sizes.len()
            )));
        }
        Ok(Self {
            group_type,
            photo_ids,
            file_sizes,
            best_shot_index: None,
        })
    }

    /// Sets the representative index; out-of-range indices are rejected.
    pub fn set_best_shot(&mut self, index: Option<usize>) -> AnalysisResult<()> {
        if let Some(i) = index {
            if i >= self.photo_ids.len() {
                return Err(AnalysisError::invalid_input(format!(
                    "best shot index {} out of range for {} photos",
                    i,
                    self.photo_ids.len()
                )));
            }
        }
        self.best_shot_index = index;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.photo_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photo_ids.is_empty()
    }

    pub fn best_shot_id(&self) -> Option<&AssetId> {
        self.best_shot_index.and_then(|i| self.photo_ids.get(i))
    }

    pub fn total_size(&self) -> i64 {
        self.file_sizes.iter().sum()
    }

    /// Bytes freed by removing everything except the best shot.
    pub fn reclaimable_size(&self) -> i64 {
        let keep = self
            .best_shot_index
            .and_then(|i| self.file_sizes.get(i))
            .copied()
            .unwrap_or(0);
        self.total_size() - keep
    }
}

/// A connected set of visually similar photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarPhotoGroup {
    pub id: String,
    pub photo_ids: Vec<AssetId>,
    pub average_similarity: f32,
    pub pair_count: usize,
}

impl SimilarPhotoGroup {
    /// Builds a group, dropping duplicate ids (first occurrence wins) and
    /// clamping the average similarity into [0, 1].
    pub fn new(photo_ids: Vec<AssetId>, average_similarity: f32, pair_count: usize) -> Self {
        let mut seen = std::collections::HashSet::new();
        let photo_ids: Vec<AssetId> = photo_ids
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let average_similarity = if average_similarity.is_nan() {
            0.0
        } else {
            average_similarity.clamp(0.0, 1.0)
        };

        Self {
            id: format!("grp_{}", uuid::Uuid::new_v4().simple()),
            photo_ids,
            average_similarity,
            pair_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingOptions {
    pub similarity_threshold: f32,
    pub minimum_group_size: usize,
    pub group_similar: bool,
    pub group_screenshots: bool,
    pub group_selfies: bool,
    pub group_blurry: bool,
    pub group_large_videos: bool,
    pub group_duplicates: bool,
    /// Bytes; videos strictly larger than this are reported.
    pub large_video_threshold: i64,
    pub auto_select_best_shot: bool,
    pub lsh_bits: u32,
    pub lsh_tables: usize,
    pub lsh_seed: u64,
    pub duplicate_hash_bits: u32,
    pub batch_size: usize,
    pub max_concurrent_operations: usize,
}

impl Default for GroupingOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            minimum_group_size: 2,
            group_similar: true,
            group_screenshots: true,
            group_selfies: true,
            group_blurry: true,
            group_large_videos: true,
            group_duplicates: true,
            large_video_threshold: 100 * 1024 * 1024,
            auto_select_best_shot: true,
            lsh_bits: 16,
            lsh_tables: 4,
            lsh_seed: 42,
            duplicate_hash_bits: 64,
            batch_size: 200,
            max_concurrent_operations: 4,
        }
    }
}

impl GroupingOptions {
    /// Copy with every field forced into its legal range.
    pub fn validated(&self) -> Self {
        let threshold = if self.similarity_threshold.is_nan() {
            Self::default().similarity_threshold
        } else {
            self.similarity_threshold.clamp(0.0, 1.0)
        };
        Self {
            similarity_threshold: threshold,
            minimum_group_size: self.minimum_group_size.max(2),
            lsh_bits: self.lsh_bits.clamp(1, 64),
            lsh_tables: self.lsh_tables.max(1),
            duplicate_hash_bits: self.duplicate_hash_bits.clamp(1, 64),
            batch_size: self.batch_size.max(1),
            max_concurrent_operations: self.max_concurrent_operations.max(1),
            ..self.clone()
        }
    }

    pub fn is_enabled(&self, group_type: GroupType) -> bool {
        match group_type {
            GroupType::Similar => self.group_similar,
            GroupType::Screenshot => self.group_screenshots,
            GroupType::Selfie => self.group_selfies,
            GroupType::Blurry => self.group_blurry,
            GroupType::LargeVideo => self.group_large_videos,
            GroupType::Duplicate => self.group_duplicates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_from_bytes() {
        let values = [1.0f32, -2.5, 0.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let vector = FeatureVector::from_bytes(&bytes).unwrap();
        assert_eq!(vector.dimension(), 3);
        assert_eq!(vector.as_slice(), &values);
        assert_eq!(vector.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn test_feature_vector_rejects_bad_buffers() {
        assert!(matches!(
            FeatureVector::from_bytes(&[]),
            Err(AnalysisError::InvalidInput { .. })
        ));
        assert!(matches!(
            FeatureVector::from_bytes(&[0, 0, 0, 0, 1]),
            Err(AnalysisError::InvalidInput { .. })
        ));
        assert!(FeatureVector::new(vec![f32::NAN, 1.0]).is_err());
    }

    #[test]
    fn test_photo_group_best_shot_bounds() {
        let mut group = PhotoGroup::new(
            GroupType::Similar,
            vec!["a".to_string(), "b".to_string()],
            vec![100, 300],
        )
        .unwrap();

        assert!(group.set_best_shot(Some(2)).is_err());
        group.set_best_shot(Some(1)).unwrap();
        assert_eq!(group.best_shot_id().map(String::as_str), Some("b"));
        assert_eq!(group.reclaimable_size(), 100);
    }

    #[test]
    fn test_photo_group_length_mismatch() {
        let result = PhotoGroup::new(GroupType::Blurry, vec!["a".to_string()], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_similar_group_dedup_and_clamp() {
        let group = SimilarPhotoGroup::new(
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
            1.2,
            3,
        );
        assert_eq!(group.photo_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(group.average_similarity, 1.0);
        assert!(group.id.starts_with("grp_"));
    }

    #[test]
    fn test_options_validated() {
        let options = GroupingOptions {
            similarity_threshold: 1.5,
            minimum_group_size: 0,
            lsh_bits: 90,
            batch_size: 0,
            ..GroupingOptions::default()
        }
        .validated();

        assert_eq!(options.similarity_threshold, 1.0);
        assert_eq!(options.minimum_group_size, 2);
        assert_eq!(options.lsh_bits, 64);
        assert_eq!(options.batch_size, 1);
    }

    #[test]
    fn test_media_type_string_roundtrip() {
        assert_eq!(MediaType::from("video".to_string()), MediaType::Video);
        assert_eq!(String::from(MediaType::Image), "image");
        assert_eq!(MediaType::from("bogus".to_string()), MediaType::Unknown);
    }
}
