//! Storage layer for persistent settings (a JSON file in the config directory)

use crate::error::ShareError;
use shareget_types::Settings;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const SETTINGS_FILE: &str = "settings.json";

/// Storage manager for shareget configuration
#[derive(Clone, Debug)]
pub struct Storage {
    /// Config directory
    config_dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance
    pub async fn new(config_dir: PathBuf) -> Result<Self, ShareError> {
        fs::create_dir_all(&config_dir).await?;

        Ok(Self { config_dir })
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load settings, falling back to defaults when none were saved yet
    pub async fn load_settings(&self) -> Result<Settings, ShareError> {
        let path = self.settings_path();

        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&path).await?;
        serde_json::from_str(&content).map_err(|e| ShareError::Serialization(e.to_string()))
    }

    /// Save settings to storage
    pub async fn save_settings(&self, settings: &Settings) -> Result<(), ShareError> {
        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| ShareError::Serialization(e.to_string()))?;

        fs::write(self.settings_path(), content).await?;

        Ok(())
    }
}
