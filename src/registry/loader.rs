use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result, anyhow};
use serde::Deserialize;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::actions::builtin;
use crate::actions::{ActionEntry, ActionFactory, ActionSpec};
use crate::error::DiscoveryLoadError;
use crate::registry::{ActionPackage, ActionRegistry, LoadReport};

/// File name suffix marking an action manifest inside a directory source.
pub const MANIFEST_SUFFIXES: [&str; 2] = [".action.yaml", ".action.yml"];

#[derive(Debug, Deserialize)]
struct ActionManifest {
    #[serde(default)]
    actions: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(flatten)]
    spec: ActionSpec,
    #[serde(rename = "impl")]
    implementation: String,
}

/// Scans sources and feeds their actions into a registry.
pub struct ActionLoader {
    registry: Arc<ActionRegistry>,
    implementations: HashMap<String, ActionFactory>,
}

impl ActionLoader {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        let implementations = builtin::implementations()
            .into_iter()
            .map(|(key, factory)| (key.to_string(), factory))
            .collect();
        Self {
            registry,
            implementations,
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Make a native implementation available to manifests under `key`.
    pub fn add_implementation(&mut self, key: &str, factory: ActionFactory) {
        self.implementations.insert(key.to_string(), factory);
    }

    pub fn add_package(&self, package: &dyn ActionPackage) -> LoadReport {
        let locator = package.locator().to_string();
        let mut report = LoadReport::new(&locator);
        if self.registry.is_source_loaded(&locator) {
            report.skipped = true;
            return report;
        }

        info!("Loading actions from package: {}", locator);
        let mut entries = Vec::new();
        for module in package.modules() {
            match module.load() {
                Ok(mut loaded) => entries.append(&mut loaded),
                Err(e) => {
                    error!(source = %locator, module = %module.name(), "Failed to load action module: {:?}", e);
                    report.load_errors.push(DiscoveryLoadError {
                        source_name: locator.clone(),
                        module: module.name().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        self.commit(entries, &mut report);
        report
    }

    /// Recursively scan `path` for action manifests.
    pub fn add_directory(&self, path: impl AsRef<Path>) -> LoadReport {
        let path = path.as_ref();
        let locator = fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string();
        let mut report = LoadReport::new(&locator);
        if self.registry.is_source_loaded(&locator) {
            report.skipped = true;
            return report;
        }
        if !path.is_dir() {
            report.load_errors.push(DiscoveryLoadError {
                source_name: locator,
                module: path.display().to_string(),
                reason: "not a directory".to_string(),
            });
            return report;
        }

        info!("Loading actions from directory: {:?}", path);
        let mut entries = Vec::new();
        let walker = WalkDir::new(path).sort_by_file_name().into_iter();
        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    report.load_errors.push(DiscoveryLoadError {
                        source_name: locator.clone(),
                        module: e.path().map(|p| p.display().to_string()).unwrap_or_default(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let is_manifest = item.file_type().is_file()
                && item
                    .file_name()
                    .to_str()
                    .is_some_and(|name| MANIFEST_SUFFIXES.iter().any(|s| name.ends_with(s)));
            if !is_manifest {
                continue;
            }

            let module = item
                .path()
                .strip_prefix(path)
                .unwrap_or(item.path())
                .display()
                .to_string();
            match self.load_manifest(item.path()) {
                Ok(mut loaded) => entries.append(&mut loaded),
                Err(e) => {
                    warn!(source = %locator, module = %module, "Skipping action manifest: {:#}", e);
                    report.load_errors.push(DiscoveryLoadError {
                        source_name: locator.clone(),
                        module,
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        self.commit(entries, &mut report);
        report
    }

    fn load_manifest(&self, file: &Path) -> Result<Vec<ActionEntry>> {
        let content = fs::read_to_string(file)
            .with_context(|| format!("Failed to read action manifest from {}", file.display()))?;
        let manifest: ActionManifest = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize action manifest from {}", file.display()))?;

        manifest
            .actions
            .into_iter()
            .map(|entry| {
                let factory = self
                    .implementations
                    .get(&entry.implementation)
                    .cloned()
                    .ok_or_else(|| anyhow!("unknown implementation '{}' for action '{}'", entry.implementation, entry.spec.id))?;
                Ok(ActionEntry {
                    spec: Arc::new(entry.spec),
                    factory,
                })
            })
            .collect()
    }

    fn commit(&self, entries: Vec<ActionEntry>, report: &mut LoadReport) {
        if entries.is_empty() {
            // a source whose modules all failed stays retryable
            if report.load_errors.is_empty() {
                self.registry.mark_source(&report.source);
            }
            return;
        }
        match self.registry.register_source(&report.source, entries) {
            Ok(ids) => {
                info!(source = %report.source, count = ids.len(), "Registered actions");
                report.loaded = ids;
            }
            Err(errors) => {
                for e in &errors {
                    error!(source = %report.source, "{}", e);
                }
                report.registration_errors = errors;
            }
        }
    }
}
