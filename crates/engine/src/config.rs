use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::direction::DirectionPolicy;
use crate::strategy::KEYWORD_CONFIDENCE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Results below this confidence are flagged for review.
    pub review_threshold: f64,
    /// Taken off the base confidence for inherited results.
    pub inherit_penalty: f64,
    /// Taken off the confidence when the account family does not fit the direction.
    pub direction_penalty: f64,
    pub fallback_timeout_ms: u64,
    pub max_concurrent_fallbacks: usize,
    /// First-pass worker threads; 0 uses the available parallelism.
    pub workers: usize,
    pub reimbursement_keywords: Vec<String>,
    pub receivable_prefix: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            review_threshold: KEYWORD_CONFIDENCE,
            inherit_penalty: 0.05,
            direction_penalty: 0.10,
            fallback_timeout_ms: 10_000,
            max_concurrent_fallbacks: 10,
            workers: 0,
            reimbursement_keywords: vec!["reimburse".to_string()],
            receivable_prefix: "Assets:Loans to".to_string(),
        }
    }
}

impl ClassifierConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("review_threshold", self.review_threshold),
            ("inherit_penalty", self.inherit_penalty),
            ("direction_penalty", self.direction_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    name,
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        }
        if self.max_concurrent_fallbacks == 0 {
            return Err(ConfigError::Invalid {
                name: "max_concurrent_fallbacks",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map_or(1, |n| n.get())
    }

    pub fn direction_policy(&self) -> DirectionPolicy {
        DirectionPolicy::new(&self.reimbursement_keywords, &self.receivable_prefix)
    }
}
