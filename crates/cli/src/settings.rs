use anyhow::Context;
use ledgersort_engine::{ChatFallbackConfig, ClassifierConfig};
use serde::Deserialize;
use std::path::Path;

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub classifier: ClassifierConfig,
    pub llm: ChatFallbackConfig,
}

impl Settings {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(content).context("invalid settings TOML")?;
        settings.classifier.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}
