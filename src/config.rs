use crate::core::blur::BlurPreset;
use crate::core::models::GroupingOptions;
use crate::core::quality::QualityPreset;
use crate::database::CacheBackendKind;
use crate::services::filtering::ScanSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub grouping: GroupingOptions,
    pub blur_preset: BlurPreset,
    pub quality_preset: QualityPreset,
    pub scan: ScanSettings,
    pub cache_enabled: bool,
    /// Overrides the default cache location when set.
    pub cache_path: Option<PathBuf>,
    pub cache_backend: CacheBackendKind,
    pub cache_ttl_days: i64,
    pub parallel_workers: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grouping: GroupingOptions::default(),
            blur_preset: BlurPreset::Default,
            quality_preset: QualityPreset::Default,
            scan: ScanSettings::default(),
            cache_enabled: true,
            cache_path: None,
            cache_backend: CacheBackendKind::Sled,
            cache_ttl_days: 30,
            parallel_workers: num_cpus::get(),
        }
    }
}

impl AppConfig {
    /// `<data dir>/Sweeprs/config.json`.
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir().context("Could not find data directory")?;
        Ok(data_dir.join("Sweeprs").join("config.json"))
    }

    /// Reads the config at `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Cache location: the configured path, or the per-backend default.
    pub fn resolved_cache_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.cache_path {
            return Ok(path.clone());
        }
        let base = crate::database::get_cache_path()?;
        Ok(match self.cache_backend {
            CacheBackendKind::Sqlite => base.with_extension("db"),
            _ => base,
        })
    }
}
