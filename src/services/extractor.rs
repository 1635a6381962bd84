use crate::core::face::FaceInfo;
use crate::core::models::{AssetDescriptor, AssetId, FeatureVector};
use crate::error::{AnalysisError, AnalysisResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Source of per-asset image measurements.
///
/// The engine never touches pixels itself. Implementations wrap whatever
/// produces embeddings, sharpness metrics and face boxes (an ML runtime, a
/// platform API, or precomputed data) and may be called concurrently.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    async fn extract(&self, asset_id: &str) -> AnalysisResult<FeatureVector>;

    /// Raw Laplacian-variance style sharpness metric, unbounded above.
    async fn sharpness_metric(&self, asset_id: &str) -> AnalysisResult<f32>;

    async fn faces(&self, asset_id: &str) -> AnalysisResult<Vec<FaceInfo>>;
}

/// One asset in a manifest: its descriptor plus whatever measurements were
/// precomputed for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(flatten)]
    pub descriptor: AssetDescriptor,
    #[serde(default)]
    pub features: Option<Vec<f32>>,
    #[serde(default)]
    pub sharpness: Option<f32>,
    #[serde(default)]
    pub faces: Option<Vec<FaceInfo>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub assets: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn descriptors(&self) -> Vec<AssetDescriptor> {
        self.assets.iter().map(|e| e.descriptor.clone()).collect()
    }
}

/// [`FeatureExtractor`] answering from a [`Manifest`] loaded up front.
#[derive(Debug, Clone, Default)]
pub struct ManifestExtractor {
    features: HashMap<AssetId, FeatureVector>,
    sharpness: HashMap<AssetId, f32>,
    faces: HashMap<AssetId, Vec<FaceInfo>>,
}

impl ManifestExtractor {
    /// Entries with malformed vectors are logged and treated as missing.
    pub fn new(manifest: &Manifest) -> Self {
        let mut extractor = Self::default();
        for entry in &manifest.assets {
            let id = &entry.descriptor.id;
            if let Some(values) = &entry.features {
                match FeatureVector::new(values.clone()) {
                    Ok(vector) => {
                        extractor.features.insert(id.clone(), vector);
                    }
                    Err(e) => log::warn!("Ignoring feature vector for {}: {}", id, e),
                }
            }
            if let Some(metric) = entry.sharpness {
                extractor.sharpness.insert(id.clone(), metric);
            }
            if let Some(faces) = &entry.faces {
                extractor.faces.insert(id.clone(), faces.clone());
            }
        }
        extractor
    }

    pub fn insert_features(&mut self, asset_id: impl Into<AssetId>, vector: FeatureVector) {
        self.features.insert(asset_id.into(), vector);
    }

    pub fn insert_sharpness(&mut self, asset_id: impl Into<AssetId>, metric: f32) {
        self.sharpness.insert(asset_id.into(), metric);
    }

    pub fn insert_faces(&mut self, asset_id: impl Into<AssetId>, faces: Vec<FaceInfo>) {
        self.faces.insert(asset_id.into(), faces);
    }

    fn missing(asset_id: &str, what: &str) -> AnalysisError {
        AnalysisError::Extraction {
            asset_id: asset_id.to_string(),
            message: format!("no {} available", what),
        }
    }
}

#[async_trait]
impl FeatureExtractor for ManifestExtractor {
    async fn extract(&self, asset_id: &str) -> AnalysisResult<FeatureVector> {
        self.features
            .get(asset_id)
            .cloned()
            .ok_or_else(|| Self::missing(asset_id, "feature vector"))
    }

    async fn sharpness_metric(&self, asset_id: &str) -> AnalysisResult<f32> {
        self.sharpness
            .get(asset_id)
            .copied()
            .ok_or_else(|| Self::missing(asset_id, "sharpness metric"))
    }

    // An asset listed without face data has no faces.
    async fn faces(&self, asset_id: &str) -> AnalysisResult<Vec<FaceInfo>> {
        Ok(self.faces.get(asset_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::MediaType;

    const MANIFEST: &str = r#"{
        "assets": [
            {
                "id": "IMG_0001",
                "media_type": "image",
                "file_size": 2048000,
                "features": [0.1, 0.2, 0.3],
                "sharpness": 180.5,
                "faces": [
                    {
                        "bounding_box": {"x": 0.2, "y": 0.2, "width": 0.5, "height": 0.5},
                        "confidence": 0.93,
                        "yaw": 4.0,
                        "pitch": -2.0
                    }
                ]
            },
            {
                "id": "VID_0002",
                "media_type": "video",
                "file_size": 209715200,
                "duration": 31.5
            },
            {
                "id": "IMG_0003",
                "media_type": "image",
                "file_size": 1000,
                "is_screenshot": true,
                "features": []
            }
        ]
    }"#;

    #[test]
    fn test_manifest_parses_descriptors() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let descriptors = manifest.descriptors();

        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[0].id, "IMG_0001");
        assert_eq!(descriptors[1].media_type, MediaType::Video);
        assert_eq!(descriptors[1].duration, 31.5);
        assert!(descriptors[2].is_screenshot);
        assert_eq!(descriptors[2].is_selfie, None);
    }

    #[tokio::test]
    async fn test_extractor_answers_from_manifest() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let extractor = ManifestExtractor::new(&manifest);

        let vector = extractor.extract("IMG_0001").await.unwrap();
        assert_eq!(vector.as_slice(), &[0.1, 0.2, 0.3]);
        assert_eq!(extractor.sharpness_metric("IMG_0001").await.unwrap(), 180.5);

        let faces = extractor.faces("IMG_0001").await.unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].is_frontal());
    }

    #[tokio::test]
    async fn test_missing_data() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let extractor = ManifestExtractor::new(&manifest);

        assert!(matches!(
            extractor.extract("VID_0002").await,
            Err(AnalysisError::Extraction { .. })
        ));
        // empty vector is dropped at load time
        assert!(extractor.extract("IMG_0003").await.is_err());
        assert!(extractor.sharpness_metric("nope").await.is_err());
        assert!(extractor.faces("VID_0002").await.unwrap().is_empty());
    }
}
