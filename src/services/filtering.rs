use crate::core::models::AssetDescriptor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which kinds of content a scan should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub include_videos: bool,
    pub include_screenshots: bool,
    pub include_selfies: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            include_videos: true,
            include_screenshots: true,
            include_selfies: true,
        }
    }
}

impl ScanSettings {
    pub fn includes_everything(&self) -> bool {
        self.include_videos && self.include_screenshots && self.include_selfies
    }

    fn includes_nothing(&self) -> bool {
        !self.include_videos && !self.include_screenshots && !self.include_selfies
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Every content type is disabled; nothing would be scanned")]
    NoContentTypesEnabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterWarning {
    /// Settings were valid but no asset survived filtering.
    EmptyResult { original_count: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterStats {
    pub original_count: usize,
    pub filtered_count: usize,
    pub excluded_video_count: usize,
    pub excluded_screenshot_count: usize,
    pub excluded_selfie_count: usize,
    pub filtering_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exclusion {
    Video,
    Screenshot,
    Selfie,
}

/// Drops assets the user opted out of before any expensive analysis runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhotoFilteringService;

impl PhotoFilteringService {
    pub fn new() -> Self {
        Self
    }

    fn exclusion(asset: &AssetDescriptor, settings: &ScanSettings) -> Option<Exclusion> {
        if !settings.include_videos && asset.is_video() {
            Some(Exclusion::Video)
        } else if !settings.include_screenshots && asset.is_screenshot {
            Some(Exclusion::Screenshot)
        } else if !settings.include_selfies && asset.is_selfie == Some(true) {
            Some(Exclusion::Selfie)
        } else {
            None
        }
    }

    pub fn filter(
        &self,
        assets: &[AssetDescriptor],
        settings: &ScanSettings,
    ) -> Vec<AssetDescriptor> {
        if settings.includes_everything() {
            return assets.to_vec();
        }
        assets
            .iter()
            .filter(|a| Self::exclusion(a, settings).is_none())
            .cloned()
            .collect()
    }

    /// Filters and counts what each setting excluded.
    ///
    /// `filtering_rate` is the share of the input that was kept,
    /// `filtered_count / original_count`, so dropping three videos from five
    /// assets gives 0.4. Empty input gives 0.0.
    pub fn filter_with_stats(
        &self,
        assets: &[AssetDescriptor],
        settings: &ScanSettings,
    ) -> (Vec<AssetDescriptor>, FilterStats) {
        let mut kept = Vec::with_capacity(assets.len());
        let mut stats = FilterStats {
            original_count: assets.len(),
            ..FilterStats::default()
        };

        for asset in assets {
            match Self::exclusion(asset, settings) {
                None => kept.push(asset.clone()),
                Some(Exclusion::Video) => stats.excluded_video_count += 1,
                Some(Exclusion::Screenshot) => stats.excluded_screenshot_count += 1,
                Some(Exclusion::Selfie) => stats.excluded_selfie_count += 1,
            }
        }

        stats.filtered_count = kept.len();
        stats.filtering_rate = if stats.original_count == 0 {
            0.0
        } else {
            stats.filtered_count as f64 / stats.original_count as f64
        };
        (kept, stats)
    }

    pub fn validate_settings(&self, settings: &ScanSettings) -> Option<FilterError> {
        if settings.includes_nothing() {
            Some(FilterError::NoContentTypesEnabled)
        } else {
            None
        }
    }

    pub fn filter_with_validation(
        &self,
        assets: &[AssetDescriptor],
        settings: &ScanSettings,
    ) -> Result<(Vec<AssetDescriptor>, Option<FilterWarning>), FilterError> {
        if let Some(error) = self.validate_settings(settings) {
            return Err(error);
        }

        let kept = self.filter(assets, settings);
        let warning = if kept.is_empty() {
            log::warn!("No assets left to scan out of {}", assets.len());
            Some(FilterWarning::EmptyResult {
                original_count: assets.len(),
            })
        } else {
            None
        };
        Ok((kept, warning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Vec<AssetDescriptor> {
        vec![
            AssetDescriptor::image("a", 100),
            AssetDescriptor::image("b", 100),
            AssetDescriptor::video("v1", 1000, 3.0),
            AssetDescriptor::video("v2", 1000, 3.0),
            AssetDescriptor::video("v3", 1000, 3.0),
        ]
    }

    #[test]
    fn test_everything_enabled_is_noop() {
        let service = PhotoFilteringService::new();
        let assets = library();
        assert_eq!(service.filter(&assets, &ScanSettings::default()), assets);
    }

    #[test]
    fn test_stats_without_videos() {
        let service = PhotoFilteringService::new();
        let settings = ScanSettings {
            include_videos: false,
            ..ScanSettings::default()
        };
        let (kept, stats) = service.filter_with_stats(&library(), &settings);

        assert_eq!(kept.len(), 2);
        assert_eq!(stats.filtered_count, 2);
        assert_eq!(stats.excluded_video_count, 3);
        assert_eq!(stats.excluded_screenshot_count, 0);
        assert!((stats.filtering_rate - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_rate_for_two_of_four() {
        // two normal photos and two videos: half survives
        let service = PhotoFilteringService::new();
        let mut assets = library();
        assets.pop();
        let settings = ScanSettings {
            include_videos: false,
            ..ScanSettings::default()
        };
        let (_, stats) = service.filter_with_stats(&assets, &settings);
        assert_eq!(stats.filtering_rate, 0.5);
    }

    #[test]
    fn test_empty_input_rate_is_zero() {
        let service = PhotoFilteringService::new();
        let (kept, stats) = service.filter_with_stats(&[], &ScanSettings::default());
        assert!(kept.is_empty());
        assert_eq!(stats.filtering_rate, 0.0);
    }

    #[test]
    fn test_screenshots_and_selfies() {
        let service = PhotoFilteringService::new();
        let mut selfie = AssetDescriptor::image("s", 10);
        selfie.is_selfie = Some(true);
        let assets = vec![
            AssetDescriptor::screenshot("shot", 10),
            selfie,
            AssetDescriptor::image("plain", 10),
        ];
        let settings = ScanSettings {
            include_videos: true,
            include_screenshots: false,
            include_selfies: false,
        };
        let (kept, stats) = service.filter_with_stats(&assets, &settings);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "plain");
        assert_eq!(stats.excluded_screenshot_count, 1);
        assert_eq!(stats.excluded_selfie_count, 1);
    }

    #[test]
    fn test_validation() {
        let service = PhotoFilteringService::new();
        let nothing = ScanSettings {
            include_videos: false,
            include_screenshots: false,
            include_selfies: false,
        };
        assert_eq!(
            service.validate_settings(&nothing),
            Some(FilterError::NoContentTypesEnabled)
        );
        assert_eq!(service.validate_settings(&ScanSettings::default()), None);
        assert!(matches!(
            service.filter_with_validation(&library(), &nothing),
            Err(FilterError::NoContentTypesEnabled)
        ));
    }

    #[test]
    fn test_empty_result_warns() {
        let service = PhotoFilteringService::new();
        let videos_only: Vec<AssetDescriptor> =
            library().into_iter().filter(|a| a.is_video()).collect();
        let settings = ScanSettings {
            include_videos: false,
            ..ScanSettings::default()
        };
        let (kept, warning) = service.filter_with_validation(&videos_only, &settings).unwrap();

        assert!(kept.is_empty());
        assert_eq!(warning, Some(FilterWarning::EmptyResult { original_count: 3 }));

        let (kept, warning) = service.filter_with_validation(&library(), &settings).unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(warning, None);
    }
}
