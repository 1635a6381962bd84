//! Best-shot selection by weighted quality score.
//!
//! `total = w_sharp * sharpness + w_face_quality * face_quality + w_face_count * face_count`
//! with every term clamped to [0, 1] and the weights renormalized to sum to 1.

use crate::core::blur::BlurDetectionResult;
use crate::core::face::FaceDetectionResult;
use crate::core::models::AssetId;
use crate::error::{AnalysisError, AnalysisResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub sharpness: f32,
    pub face_quality: f32,
    pub face_count: f32,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self::preset(QualityPreset::Default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Default,
    SharpnessPriority,
    FaceQualityPriority,
    PortraitMode,
}

impl QualityWeights {
    pub fn new(sharpness: f32, face_quality: f32, face_count: f32) -> Self {
        Self {
            sharpness,
            face_quality,
            face_count,
        }
        .normalized()
    }

    pub fn preset(preset: QualityPreset) -> Self {
        let (sharpness, face_quality, face_count) = match preset {
            QualityPreset::Default => (0.5, 0.3, 0.2),
            QualityPreset::SharpnessPriority => (0.7, 0.2, 0.1),
            QualityPreset::FaceQualityPriority => (0.2, 0.6, 0.2),
            QualityPreset::PortraitMode => (0.2, 0.5, 0.3),
        };
        Self {
            sharpness,
            face_quality,
            face_count,
        }
    }

    /// Scales the weights to sum to 1. Negative or non-finite weights count
    /// as zero; all-zero input falls back to the default preset.
    pub fn normalized(&self) -> Self {
        let clean = |w: f32| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let (s, q, c) = (
            clean(self.sharpness),
            clean(self.face_quality),
            clean(self.face_count),
        );
        let sum = s + q + c;
        if sum <= f32::EPSILON {
            return Self::default();
        }
        Self {
            sharpness: s / sum,
            face_quality: q / sum,
            face_count: c / sum,
        }
    }

    pub fn sum(&self) -> f32 {
        self.sharpness + self.face_quality + self.face_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityLevel {
    pub fn from_score(score: f32) -> Self {
        match score {
            s if s >= 0.8 => QualityLevel::Excellent,
            s if s >= 0.6 => QualityLevel::Good,
            s if s >= 0.4 => QualityLevel::Fair,
            _ => QualityLevel::Poor,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityLevel::Excellent => write!(f, "Excellent"),
            QualityLevel::Good => write!(f, "Good"),
            QualityLevel::Fair => write!(f, "Fair"),
            QualityLevel::Poor => write!(f, "Poor"),
        }
    }
}

/// Per-photo score. Equality and ordering look at `total_score` only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoQualityScore {
    pub photo_id: AssetId,
    pub sharpness_score: f32,
    pub face_quality_score: f32,
    pub face_count_score: f32,
    pub total_score: f32,
}

impl PhotoQualityScore {
    pub fn level(&self) -> QualityLevel {
        QualityLevel::from_score(self.total_score)
    }
}

impl PartialEq for PhotoQualityScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PhotoQualityScore {}

impl PartialOrd for PhotoQualityScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PhotoQualityScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_score.total_cmp(&other.total_score)
    }
}

fn unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityScorer {
    weights: QualityWeights,
}

impl QualityScorer {
    pub fn new(weights: QualityWeights) -> Self {
        Self {
            weights: weights.normalized(),
        }
    }

    pub fn with_preset(preset: QualityPreset) -> Self {
        Self::new(QualityWeights::preset(preset))
    }

    pub fn weights(&self) -> &QualityWeights {
        &self.weights
    }

    pub fn score_components(
        &self,
        photo_id: &str,
        sharpness: f32,
        face_quality: f32,
        face_count: f32,
    ) -> PhotoQualityScore {
        let sharpness_score = unit(sharpness);
        let face_quality_score = unit(face_quality);
        let face_count_score = unit(face_count);
        let total = self.weights.sharpness * sharpness_score
            + self.weights.face_quality * face_quality_score
            + self.weights.face_count * face_count_score;

        PhotoQualityScore {
            photo_id: photo_id.to_string(),
            sharpness_score,
            face_quality_score,
            face_count_score,
            total_score: unit(total),
        }
    }

    pub fn score(
        &self,
        blur: &BlurDetectionResult,
        faces: Option<&FaceDetectionResult>,
    ) -> PhotoQualityScore {
        let (face_quality, face_count) = match faces {
            Some(result) => (face_quality_score(result), face_count_score(result.face_count())),
            None => (0.5, face_count_score(0)),
        };
        self.score_components(&blur.photo_id, blur.sharpness_score, face_quality, face_count)
    }

    /// Highest score first; equal scores keep their input order.
    pub fn rank(&self, mut scores: Vec<PhotoQualityScore>) -> Vec<PhotoQualityScore> {
        scores.sort_by(|a, b| b.cmp(a));
        scores
    }
}

/// Mean of per-face confidence weighted by pose: frontal 1.0, turned 0.7,
/// unknown pose 0.85. A photo without faces is neutral (0.5).
pub fn face_quality_score(result: &FaceDetectionResult) -> f32 {
    if result.faces.is_empty() {
        return 0.5;
    }
    let total: f32 = result
        .faces
        .iter()
        .map(|face| {
            let pose = if face.is_frontal() {
                1.0
            } else if face.has_pose() {
                0.7
            } else {
                0.85
            };
            unit(face.confidence) * pose
        })
        .sum();
    unit(total / result.faces.len() as f32)
}

pub fn face_count_score(count: usize) -> f32 {
    match count {
        0 => 0.5,
        1..=3 => 1.0,
        n => (1.0 - 0.1 * (n - 3) as f32).max(0.5),
    }
}

#[derive(Debug, Clone, Default)]
pub struct BestShotSelector {
    scorer: QualityScorer,
}

impl BestShotSelector {
    pub fn new(scorer: QualityScorer) -> Self {
        Self { scorer }
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    /// Index of the best photo in `photo_ids`.
    ///
    /// `None` for an empty group and `Some(0)` for a single photo, without
    /// scoring. Otherwise every photo is scored and the first maximum wins.
    /// A scoring failure fails the whole selection.
    pub fn select_best_shot<F>(
        &self,
        photo_ids: &[AssetId],
        mut score_for: F,
    ) -> AnalysisResult<Option<usize>>
    where
        F: FnMut(&QualityScorer, &AssetId) -> AnalysisResult<PhotoQualityScore>,
    {
        self.select_by(photo_ids, |_, id| {
            score_for(&self.scorer, id).map(|score| f64::from(score.total_score))
        })
    }

    /// [`select_best_shot`](Self::select_best_shot) with a caller-supplied
    /// ranking key in place of the quality score. The key gets each item's
    /// index and id.
    pub fn select_by<F>(
        &self,
        photo_ids: &[AssetId],
        mut key_for: F,
    ) -> AnalysisResult<Option<usize>>
    where
        F: FnMut(usize, &AssetId) -> AnalysisResult<f64>,
    {
        match photo_ids.len() {
            0 => return Ok(None),
            1 => return Ok(Some(0)),
            _ => {}
        }

        let mut best: Option<(usize, f64)> = None;
        for (index, id) in photo_ids.iter().enumerate() {
            let key = key_for(index, id).map_err(|e| match e {
                AnalysisError::Cancelled => AnalysisError::Cancelled,
                other => AnalysisError::grouping_failed(format!(
                    "could not score {}: {}",
                    id, other
                )),
            })?;
            match best {
                Some((_, top)) if key <= top => {}
                _ => best = Some((index, key)),
            }
        }
        Ok(best.map(|(index, _)| index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::{BoundingBox, FaceInfo};

    const PRESETS: [QualityPreset; 4] = [
        QualityPreset::Default,
        QualityPreset::SharpnessPriority,
        QualityPreset::FaceQualityPriority,
        QualityPreset::PortraitMode,
    ];

    fn blur(id: &str, sharpness: f32) -> BlurDetectionResult {
        BlurDetectionResult {
            photo_id: id.to_string(),
            blur_score: 1.0 - sharpness,
            sharpness_score: sharpness,
            is_blurry: sharpness < 0.6,
        }
    }

    #[test]
    fn test_preset_weights_sum_to_one() {
        for preset in PRESETS {
            let weights = *QualityScorer::with_preset(preset).weights();
            assert!((weights.sum() - 1.0).abs() < 1e-3, "{:?}", preset);
        }
    }

    #[test]
    fn test_preset_emphasis() {
        let sharp = QualityWeights::preset(QualityPreset::SharpnessPriority);
        assert!(sharp.sharpness > sharp.face_quality + sharp.face_count);

        let faces = QualityWeights::preset(QualityPreset::FaceQualityPriority);
        assert!(faces.face_quality > faces.sharpness);
        assert!(faces.face_quality > faces.face_count);

        let portrait = QualityWeights::preset(QualityPreset::PortraitMode);
        assert!(portrait.face_quality + portrait.face_count > portrait.sharpness);
    }

    #[test]
    fn test_weights_renormalize() {
        let weights = QualityWeights::new(2.0, 1.0, 1.0);
        assert!((weights.sharpness - 0.5).abs() < 1e-6);
        assert!((weights.sum() - 1.0).abs() < 1e-6);

        let fallback = QualityWeights::new(0.0, 0.0, 0.0);
        assert_eq!(fallback, QualityWeights::default());
        assert!((fallback.sum() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_scores_are_clamped() {
        let scorer = QualityScorer::default();
        let score = scorer.score_components("p", 3.0, -1.0, f32::NAN);
        assert_eq!(score.sharpness_score, 1.0);
        assert_eq!(score.face_quality_score, 0.0);
        assert_eq!(score.face_count_score, 0.0);
        assert!((0.0..=1.0).contains(&score.total_score));
    }

    #[test]
    fn test_quality_levels() {
        assert_eq!(QualityLevel::from_score(0.95), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.8), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_score(0.6), QualityLevel::Good);
        assert_eq!(QualityLevel::from_score(0.45), QualityLevel::Fair);
        assert_eq!(QualityLevel::from_score(0.1), QualityLevel::Poor);
        assert!(QualityLevel::Excellent > QualityLevel::Poor);
    }

    #[test]
    fn test_face_scores() {
        assert_eq!(face_count_score(0), 0.5);
        assert_eq!(face_count_score(2), 1.0);
        assert!((face_count_score(5) - 0.8).abs() < 1e-6);
        assert_eq!(face_count_score(50), 0.5);

        let result = FaceDetectionResult {
            photo_id: "p".to_string(),
            faces: vec![
                FaceInfo::new(BoundingBox::new(0.0, 0.0, 0.3, 0.3), 1.0)
                    .with_pose(None, Some(0.0), Some(0.0)),
                FaceInfo::new(BoundingBox::new(0.5, 0.5, 0.3, 0.3), 1.0)
                    .with_pose(None, Some(80.0), Some(0.0)),
            ],
            is_selfie: false,
        };
        assert!((face_quality_score(&result) - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_scores_order_by_total() {
        let scorer = QualityScorer::default();
        let low = scorer.score(&blur("low", 0.2), None);
        let high = scorer.score(&blur("high", 0.9), None);
        assert!(high > low);

        let ranked = scorer.rank(vec![low.clone(), high.clone()]);
        assert_eq!(ranked[0].photo_id, "high");
    }

    #[test]
    fn test_select_best_shot_edge_cases() {
        let selector = BestShotSelector::default();
        let mut calls = 0;
        let never = |_: &QualityScorer, _: &AssetId| -> AnalysisResult<PhotoQualityScore> {
            calls += 1;
            Err(AnalysisError::invalid_input("should not be called"))
        };
        assert_eq!(selector.select_best_shot(&[], never).unwrap(), None);

        let single = vec!["only".to_string()];
        let result = selector
            .select_best_shot(&single, |_, _| Err(AnalysisError::invalid_input("unused")))
            .unwrap();
        assert_eq!(result, Some(0));
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_select_best_shot_picks_first_maximum() {
        let selector = BestShotSelector::default();
        let ids: Vec<AssetId> = vec!["a", "b", "c", "d"]
            .into_iter()
            .map(String::from)
            .collect();
        let sharpness = |id: &AssetId| match id.as_str() {
            "a" => 0.3,
            "b" => 0.9,
            "c" => 0.9,
            _ => 0.1,
        };

        let best = selector
            .select_best_shot(&ids, |scorer, id| Ok(scorer.score(&blur(id, sharpness(id)), None)))
            .unwrap();
        assert_eq!(best, Some(1));
    }

    #[test]
    fn test_select_by_key() {
        let selector = BestShotSelector::default();
        let ids: Vec<AssetId> = vec!["a".into(), "b".into(), "c".into()];
        let sizes = [300_i64, 100, 100];

        let smallest = selector
            .select_by(&ids, |i, _| Ok(-(sizes[i] as f64)))
            .unwrap();
        assert_eq!(smallest, Some(1));
        assert_eq!(selector.select_by(&[], |_, _| Ok(0.0)).unwrap(), None);
    }

    #[test]
    fn test_select_best_shot_failure_is_grouping_failed() {
        let selector = BestShotSelector::default();
        let ids = vec!["a".to_string(), "b".to_string()];
        let result = selector.select_best_shot(&ids, |scorer, id| {
            if id == "b" {
                Err(AnalysisError::Extraction {
                    asset_id: id.clone(),
                    message: "no data".to_string(),
                })
            } else {
                Ok(scorer.score(&blur(id, 0.5), None))
            }
        });
        assert!(matches!(result, Err(AnalysisError::GroupingFailed { .. })));
    }
}
