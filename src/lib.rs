//! Photo similarity clustering and best-shot selection.
//!
//! Assets arrive as [`AssetDescriptor`]s with their measurements supplied by
//! a [`FeatureExtractor`]. [`PhotoGrouper`] turns them into typed
//! [`PhotoGroup`]s (similar bursts, duplicates, screenshots, selfies, blurry
//! shots, large videos) and picks a representative photo for each.

pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod services;

pub use crate::core::blur::{BlurDetectionConfig, BlurDetectionResult, BlurDetector, BlurPreset};
pub use crate::core::face::{BoundingBox, FaceDetectionResult, FaceDetector, FaceInfo};
pub use crate::core::grouper::{
    CancellationToken, GroupingStage, GroupingState, GroupingSummary, PhotoGrouper, ProgressFn,
    ProgressRange,
};
pub use crate::core::lsh::{LshHasher, hamming_distance};
pub use crate::core::models::{
    AssetDescriptor, AssetId, FeatureVector, GroupType, GroupingOptions, MediaType, PhotoGroup,
    SimilarPhotoGroup,
};
pub use crate::core::quality::{
    BestShotSelector, PhotoQualityScore, QualityLevel, QualityPreset, QualityScorer, QualityWeights,
};
pub use crate::core::similarity::SimilarityCalculator;
pub use crate::core::union_find::{CandidateGrouper, UnionFind};
pub use crate::database::{AnalysisCacheManager, CacheBackend, DatabaseError, PhotoAnalysisResult};
pub use crate::error::{AnalysisError, AnalysisResult};
pub use crate::services::extractor::{FeatureExtractor, Manifest, ManifestExtractor};
pub use crate::services::filtering::{PhotoFilteringService, ScanSettings};
