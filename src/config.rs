use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::actions::builtin::CoreActions;
use crate::registry::{ActionLoader, ActionRegistry, LoadReport};

fn default_true() -> bool {
    true
}

/// Pipeline-wide configuration, read from a YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directories scanned for action manifests at startup.
    #[serde(default)]
    pub action_dirs: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub builtin_actions: bool,
    /// Settings applied under every blueprint's own settings.
    #[serde(default)]
    pub default_settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub stop_on_validation_warnings: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            action_dirs: Vec::new(),
            builtin_actions: true,
            default_settings: BTreeMap::new(),
            log_level: None,
            stop_on_validation_warnings: false,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        let config: PipelineConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;
        Ok(config)
    }

    /// Build a registry from the built-in package (if enabled), the
    /// configured directories, then `extra_dirs`.
    pub fn build_registry(&self, extra_dirs: &[PathBuf]) -> (Arc<ActionRegistry>, Vec<LoadReport>) {
        let registry = ActionRegistry::shared();
        let loader = ActionLoader::new(registry.clone());
        let mut reports = Vec::new();
        if self.builtin_actions {
            reports.push(loader.add_package(&CoreActions));
        }
        for dir in self.action_dirs.iter().chain(extra_dirs) {
            reports.push(loader.add_directory(dir));
        }
        for report in reports.iter().filter(|r| !r.is_ok()) {
            warn!(source = %report.source, errors = report.error_count(), "Action source loaded with errors");
        }
        (registry, reports)
    }
}
