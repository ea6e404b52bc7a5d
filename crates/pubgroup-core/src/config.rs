use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::ImportSource;

/// Root application configuration, loaded from `~/.config/pubgroup/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub matching: MatchingConfig,
    pub auto_merge: AutoMergeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum trigram similarity for two titles to be candidate duplicates.
    pub similarity_threshold: f64,
    /// Sources whose DOIs are too unreliable to compare when they are a
    /// publication's only import.
    pub doi_unreliable_sources: Vec<ImportSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoMergeConfig {
    /// Source of the surviving record.
    pub target_source: ImportSource,
    /// Source of the record folded into it.
    pub absorbed_source: ImportSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("pubgroup");
        Self {
            data_dir: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            doi_unreliable_sources: vec![ImportSource::ActivityReporting],
        }
    }
}

impl Default for AutoMergeConfig {
    fn default() -> Self {
        Self {
            target_source: ImportSource::ResearchInfo,
            absorbed_source: ImportSource::ActivityReporting,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/pubgroup/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PUBGROUP_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("pubgroup")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.matching.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CoreError::ConfigError(format!(
                "matching.similarity_threshold must be within 0..=1, got {threshold}"
            )));
        }
        if self.auto_merge.target_source == self.auto_merge.absorbed_source {
            return Err(CoreError::ConfigError(
                "auto_merge.target_source and auto_merge.absorbed_source must differ".into(),
            ));
        }
        Ok(())
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.core.data_dir = dir.to_string_lossy().to_string();
    }

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir).join("pubgroup.db")
    }
}
