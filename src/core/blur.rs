//! Sharpness classification from an externally computed metric.
//!
//! The metric is a Laplacian-variance style number: zero for a flat image and
//! growing without bound as edges get crisper. It is squashed into
//! `sharpness = m / (m + reference)`, so `reference` is the metric value that
//! reads as exactly half sharp, and `blur = 1 - sharpness`.

use crate::core::models::AssetId;
use crate::error::{AnalysisError, AnalysisResult};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_SHARPNESS_REFERENCE: f32 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlurDetectionResult {
    pub photo_id: AssetId,
    pub blur_score: f32,
    pub sharpness_score: f32,
    pub is_blurry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlurPreset {
    Strict,
    Default,
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlurDetectionConfig {
    pub threshold: f32,
    pub batch_size: usize,
    pub max_concurrent_operations: usize,
    pub sharpness_reference: f32,
}

impl Default for BlurDetectionConfig {
    fn default() -> Self {
        Self::preset(BlurPreset::Default)
    }
}

impl BlurDetectionConfig {
    pub fn preset(preset: BlurPreset) -> Self {
        match preset {
            BlurPreset::Strict => Self {
                threshold: 0.3,
                batch_size: 50,
                max_concurrent_operations: 2,
                sharpness_reference: DEFAULT_SHARPNESS_REFERENCE,
            },
            BlurPreset::Default => Self {
                threshold: 0.4,
                batch_size: 100,
                max_concurrent_operations: 4,
                sharpness_reference: DEFAULT_SHARPNESS_REFERENCE,
            },
            BlurPreset::Relaxed => Self {
                threshold: 0.5,
                batch_size: 200,
                max_concurrent_operations: 8,
                sharpness_reference: DEFAULT_SHARPNESS_REFERENCE,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlurDetector {
    config: BlurDetectionConfig,
}

impl BlurDetector {
    pub fn new(config: BlurDetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlurDetectionConfig {
        &self.config
    }

    pub fn detect_blur(&self, metric: f32, photo_id: &str) -> AnalysisResult<BlurDetectionResult> {
        if !metric.is_finite() || metric < 0.0 {
            return Err(AnalysisError::invalid_input(format!(
                "sharpness metric {} for {} is not a non-negative number",
                metric, photo_id
            )));
        }

        let reference = self.config.sharpness_reference.max(f32::EPSILON);
        let sharpness_score = (metric / (metric + reference)).clamp(0.0, 1.0);
        let blur_score = 1.0 - sharpness_score;

        Ok(BlurDetectionResult {
            photo_id: photo_id.to_string(),
            blur_score,
            sharpness_score,
            is_blurry: blur_score >= self.config.threshold,
        })
    }

    /// Classifies `photo_ids` in batches, fetching each metric with `metric_for`.
    ///
    /// Up to `max_concurrent_operations` batches are in flight; the cancel flag
    /// is read before each batch starts. Photos whose metric cannot be fetched
    /// are logged and left out of the result.
    pub async fn detect_blur_batch<F, Fut>(
        &self,
        photo_ids: &[AssetId],
        metric_for: F,
        cancelled: &AtomicBool,
    ) -> AnalysisResult<Vec<BlurDetectionResult>>
    where
        F: Fn(AssetId) -> Fut,
        Fut: Future<Output = AnalysisResult<f32>>,
    {
        let batch_size = self.config.batch_size.max(1);
        let metric_for = &metric_for;

        let batches = stream::iter(photo_ids.chunks(batch_size))
            .map(|batch| async move {
                if cancelled.load(Ordering::Relaxed) {
                    return Err(AnalysisError::Cancelled);
                }
                let mut results = Vec::with_capacity(batch.len());
                for id in batch {
                    let detection = match metric_for(id.clone()).await {
                        Ok(metric) => self.detect_blur(metric, id),
                        Err(e) => Err(e),
                    };
                    match detection {
                        Ok(result) => results.push(result),
                        Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                        Err(e) => log::warn!("Skipping blur detection for {}: {}", id, e),
                    }
                }
                Ok(results)
            })
            .buffered(self.config.max_concurrent_operations.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut results = Vec::with_capacity(photo_ids.len());
        for batch in batches {
            results.extend(batch?);
        }
        Ok(results)
    }
}

impl Default for BlurDetector {
    fn default() -> Self {
        Self::new(BlurDetectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_sum_to_one() {
        let detector = BlurDetector::default();
        for metric in [0.0, 1.0, 42.0, 100.0, 5000.0, 1e9] {
            let result = detector.detect_blur(metric, "p").unwrap();
            assert!((result.blur_score + result.sharpness_score - 1.0).abs() < 1e-6);
            assert!((0.0..=1.0).contains(&result.blur_score));
            assert!((0.0..=1.0).contains(&result.sharpness_score));
        }
    }

    #[test]
    fn test_threshold_classification() {
        let detector = BlurDetector::default();
        assert!(detector.detect_blur(0.0, "flat").unwrap().is_blurry);
        assert!(!detector.detect_blur(1000.0, "crisp").unwrap().is_blurry);
        // metric == reference gives blur 0.5, above the 0.4 default
        assert!(detector.detect_blur(100.0, "mid").unwrap().is_blurry);

        let relaxed = BlurDetector::new(BlurDetectionConfig::preset(BlurPreset::Relaxed));
        // blur = 100/(150+100) = 0.4
        assert!(!relaxed.detect_blur(150.0, "mid").unwrap().is_blurry);
    }

    #[test]
    fn test_rejects_bad_metrics() {
        let detector = BlurDetector::default();
        assert!(detector.detect_blur(-1.0, "p").is_err());
        assert!(detector.detect_blur(f32::NAN, "p").is_err());
    }

    #[test]
    fn test_presets_are_ordered() {
        let strict = BlurDetectionConfig::preset(BlurPreset::Strict);
        let default = BlurDetectionConfig::preset(BlurPreset::Default);
        let relaxed = BlurDetectionConfig::preset(BlurPreset::Relaxed);

        assert_eq!(strict.threshold, 0.3);
        assert_eq!(default.threshold, 0.4);
        assert_eq!(relaxed.threshold, 0.5);
        assert!(strict.batch_size < default.batch_size);
        assert!(default.batch_size < relaxed.batch_size);
        assert!(strict.max_concurrent_operations < relaxed.max_concurrent_operations);
    }

    #[tokio::test]
    async fn test_batch_skips_failures() {
        let detector = BlurDetector::new(BlurDetectionConfig {
            batch_size: 2,
            ..BlurDetectionConfig::default()
        });
        let ids: Vec<AssetId> = (0..5).map(|i| format!("p{}", i)).collect();
        let cancelled = AtomicBool::new(false);

        let results = detector
            .detect_blur_batch(
                &ids,
                |id| async move {
                    if id == "p3" {
                        Err(AnalysisError::Extraction {
                            asset_id: id,
                            message: "missing".to_string(),
                        })
                    } else {
                        Ok(10.0)
                    }
                },
                &cancelled,
            )
            .await
            .unwrap();

        let returned: Vec<&str> = results.iter().map(|r| r.photo_id.as_str()).collect();
        assert_eq!(returned, vec!["p0", "p1", "p2", "p4"]);
    }

    #[tokio::test]
    async fn test_batch_observes_cancellation() {
        let detector = BlurDetector::default();
        let ids: Vec<AssetId> = (0..10).map(|i| format!("p{}", i)).collect();
        let cancelled = AtomicBool::new(true);

        let result = detector
            .detect_blur_batch(&ids, |_| async { Ok(500.0) }, &cancelled)
            .await;
        assert!(matches!(result, Err(AnalysisError::Cancelled)));
    }
}
