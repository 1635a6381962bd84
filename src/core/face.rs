use crate::core::models::AssetId;
use serde::{Deserialize, Serialize};

pub const FRONTAL_MAX_YAW: f32 = 35.0;
pub const FRONTAL_MAX_PITCH: f32 = 25.0;

/// Axis-aligned box in normalized image coordinates (0..1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Same box clipped to the unit square.
    pub fn normalized(&self) -> Self {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let right = (self.x + self.width.max(0.0)).clamp(0.0, 1.0);
        let bottom = (self.y + self.height.max(0.0)).clamp(0.0, 1.0);
        Self {
            x,
            y,
            width: right - x,
            height: bottom - y,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One detected face. Angles are in degrees when the detector reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceInfo {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    #[serde(default)]
    pub roll: Option<f32>,
    #[serde(default)]
    pub yaw: Option<f32>,
    #[serde(default)]
    pub pitch: Option<f32>,
}

impl FaceInfo {
    pub fn new(bounding_box: BoundingBox, confidence: f32) -> Self {
        Self {
            bounding_box,
            confidence,
            roll: None,
            yaw: None,
            pitch: None,
        }
    }

    pub fn with_pose(mut self, roll: Option<f32>, yaw: Option<f32>, pitch: Option<f32>) -> Self {
        self.roll = roll;
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    /// Faces without yaw and pitch are never frontal.
    pub fn is_frontal(&self) -> bool {
        match (self.yaw, self.pitch) {
            (Some(yaw), Some(pitch)) => {
                yaw.abs() < FRONTAL_MAX_YAW && pitch.abs() < FRONTAL_MAX_PITCH
            }
            _ => false,
        }
    }

    pub fn has_pose(&self) -> bool {
        self.yaw.is_some() && self.pitch.is_some()
    }

    pub fn area(&self) -> f32 {
        self.bounding_box.area()
    }

    pub fn center(&self) -> (f32, f32) {
        self.bounding_box.center()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionResult {
    pub photo_id: AssetId,
    pub faces: Vec<FaceInfo>,
    pub is_selfie: bool,
}

impl FaceDetectionResult {
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn average_confidence(&self) -> Option<f32> {
        if self.faces.is_empty() {
            return None;
        }
        let sum: f32 = self.faces.iter().map(|f| f.confidence).sum();
        Some(sum / self.faces.len() as f32)
    }

    pub fn frontal_face_count(&self) -> Option<usize> {
        if self.faces.is_empty() {
            return None;
        }
        Some(self.faces.iter().filter(|f| f.is_frontal()).count())
    }

    pub fn max_face_area(&self) -> Option<f32> {
        self.faces.iter().map(FaceInfo::area).reduce(f32::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectionConfig {
    /// Fraction of the frame the largest face must cover.
    pub selfie_min_face_ratio: f32,
    pub selfie_max_faces: usize,
    pub min_confidence: f32,
}

impl Default for FaceDetectionConfig {
    fn default() -> Self {
        Self {
            selfie_min_face_ratio: 0.15,
            selfie_max_faces: 2,
            min_confidence: 0.0,
        }
    }
}

/// Normalizes raw detector output and applies the selfie heuristic.
#[derive(Debug, Clone, Default)]
pub struct FaceDetector {
    config: FaceDetectionConfig,
}

impl FaceDetector {
    pub fn new(config: FaceDetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FaceDetectionConfig {
        &self.config
    }

    pub fn analyze(&self, photo_id: &str, raw_faces: Vec<FaceInfo>) -> FaceDetectionResult {
        let faces: Vec<FaceInfo> = raw_faces
            .into_iter()
            .filter(|f| f.confidence.is_finite() && f.confidence >= self.config.min_confidence)
            .map(|mut f| {
                f.bounding_box = f.bounding_box.normalized();
                f.confidence = f.confidence.clamp(0.0, 1.0);
                f
            })
            .collect();
        let is_selfie = self.is_selfie(&faces);

        FaceDetectionResult {
            photo_id: photo_id.to_string(),
            faces,
            is_selfie,
        }
    }

    pub fn is_selfie(&self, faces: &[FaceInfo]) -> bool {
        if faces.is_empty() || faces.len() > self.config.selfie_max_faces {
            return false;
        }
        faces
            .iter()
            .map(FaceInfo::area)
            .reduce(f32::max)
            .is_some_and(|largest| largest > self.config.selfie_min_face_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(size: f32, confidence: f32) -> FaceInfo {
        FaceInfo::new(BoundingBox::new(0.1, 0.1, size, size), confidence)
    }

    #[test]
    fn test_frontal_requires_pose() {
        let no_pose = face(0.3, 0.9);
        assert!(!no_pose.is_frontal());

        let frontal = face(0.3, 0.9).with_pose(Some(0.0), Some(10.0), Some(-5.0));
        assert!(frontal.is_frontal());

        let profile = face(0.3, 0.9).with_pose(None, Some(60.0), Some(0.0));
        assert!(!profile.is_frontal());

        let looking_down = face(0.3, 0.9).with_pose(None, Some(0.0), Some(-40.0));
        assert!(!looking_down.is_frontal());
    }

    #[test]
    fn test_geometry() {
        let f = FaceInfo::new(BoundingBox::new(0.2, 0.4, 0.2, 0.4), 1.0);
        assert!((f.area() - 0.08).abs() < 1e-6);
        let (cx, cy) = f.center();
        assert!((cx - 0.3).abs() < 1e-6);
        assert!((cy - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_selfie_heuristic() {
        let detector = FaceDetector::default();

        assert!(detector.analyze("a", vec![face(0.5, 0.9)]).is_selfie);
        assert!(detector.analyze("b", vec![face(0.5, 0.9), face(0.1, 0.8)]).is_selfie);
        assert!(!detector.analyze("c", vec![face(0.2, 0.9)]).is_selfie);
        assert!(
            !detector
                .analyze("d", vec![face(0.5, 0.9), face(0.5, 0.9), face(0.5, 0.9)])
                .is_selfie
        );
        assert!(!detector.analyze("e", vec![]).is_selfie);
    }

    #[test]
    fn test_boxes_are_clipped() {
        let detector = FaceDetector::default();
        let raw = FaceInfo::new(BoundingBox::new(0.8, 0.8, 0.5, 0.5), 1.4);
        let result = detector.analyze("p", vec![raw]);

        let b = result.faces[0].bounding_box;
        assert!((b.width - 0.2).abs() < 1e-6);
        assert!((b.height - 0.2).abs() < 1e-6);
        assert_eq!(result.faces[0].confidence, 1.0);
    }

    #[test]
    fn test_aggregates_are_none_when_empty() {
        let result = FaceDetector::default().analyze("p", vec![]);
        assert_eq!(result.average_confidence(), None);
        assert_eq!(result.frontal_face_count(), None);
        assert_eq!(result.max_face_area(), None);
    }

    #[test]
    fn test_aggregates() {
        let faces = vec![
            face(0.2, 0.6).with_pose(None, Some(5.0), Some(5.0)),
            face(0.4, 1.0),
        ];
        let result = FaceDetector::default().analyze("p", faces);

        assert!((result.average_confidence().unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(result.frontal_face_count(), Some(1));
        assert!((result.max_face_area().unwrap() - 0.16).abs() < 1e-6);
    }
}
