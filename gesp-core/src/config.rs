//! Configuration
//!
//! Loaded from YAML, then overridden field by field from the environment.
//!
//! Path resolution order:
//! 1. GESP_CONFIG environment variable
//! 2. `config/gesp.yaml` relative to the working directory
//! 3. Built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::rules::Rules;
use crate::vm::DEFAULT_MAX_STEPS;

pub const DEFAULT_CONFIG_PATH: &str = "config/gesp.yaml";
pub const DEFAULT_MAX_SOURCE_LEN: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GespConfig {
    /// VM step budget per run.
    pub max_steps: usize,
    /// Longest rules source accepted, in bytes.
    pub max_source_len: usize,
    /// Rules for entities that have none stored.
    pub default_rules: Option<Rules>,
}

impl Default for GespConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_source_len: DEFAULT_MAX_SOURCE_LEN,
            default_rules: None,
        }
    }
}

impl GespConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading gesp configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_env() -> Result<Self> {
        let mut config = if let Ok(path) = std::env::var("GESP_CONFIG") {
            Self::load(Path::new(&path))?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply GESP_MAX_STEPS / GESP_MAX_SOURCE_LEN from `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(steps) = var("GESP_MAX_STEPS") {
            self.max_steps = steps
                .parse()
                .map_err(|e| anyhow!("GESP_MAX_STEPS={steps}: {e}"))?;
        }
        if let Some(len) = var("GESP_MAX_SOURCE_LEN") {
            self.max_source_len = len
                .parse()
                .map_err(|e| anyhow!("GESP_MAX_SOURCE_LEN={len}: {e}"))?;
        }
        Ok(())
    }
}
