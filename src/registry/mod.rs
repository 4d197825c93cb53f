//! Identifier -> action lookup, populated by the loader from registered sources.

pub mod loader;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use crate::actions::{ActionEntry, ActionSpec};
use crate::error::{DiscoveryLoadError, RegistrationError, UnresolvedActionError};

pub use loader::ActionLoader;

/// One importable unit inside a source. Loading may fail independently of
/// the other modules in the same source.
pub trait ActionModule: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self) -> Result<Vec<ActionEntry>>;
}

/// The plugin contract: a package of action modules found by locator.
pub trait ActionPackage: Send + Sync {
    fn locator(&self) -> &str;
    fn modules(&self) -> Vec<Box<dyn ActionModule>>;
}

#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub entry: ActionEntry,
    /// Locator of the source that registered the action.
    pub source: String,
}

/// Result of scanning one source.
#[derive(Debug, Default, Clone)]
pub struct LoadReport {
    pub source: String,
    /// The source had already been loaded; nothing was scanned.
    pub skipped: bool,
    pub loaded: Vec<String>,
    pub load_errors: Vec<DiscoveryLoadError>,
    pub registration_errors: Vec<RegistrationError>,
}

impl LoadReport {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.load_errors.is_empty() && self.registration_errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.load_errors.len() + self.registration_errors.len()
    }
}

/// Registered actions, safe for concurrent reads.
///
/// Writes happen during setup; callers must not load sources while a build
/// is running against the same registry.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    actions: DashMap<String, RegisteredAction>,
    sources: DashSet<String>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn get(&self, id: &str) -> Result<ActionEntry, UnresolvedActionError> {
        self.actions
            .get(id)
            .map(|r| r.entry.clone())
            .ok_or_else(|| UnresolvedActionError { action_id: id.to_string() })
    }

    pub fn spec(&self, id: &str) -> Option<Arc<ActionSpec>> {
        self.actions.get(id).map(|r| r.entry.spec.clone())
    }

    pub fn source_of(&self, id: &str) -> Option<String> {
        self.actions.get(id).map(|r| r.source.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    /// All specs, ordered by category then display name.
    pub fn all(&self) -> Vec<Arc<ActionSpec>> {
        let mut specs: Vec<Arc<ActionSpec>> = self.actions.iter().map(|r| r.entry.spec.clone()).collect();
        specs.sort_by(|a, b| {
            (&a.category, &a.display_name, &a.id).cmp(&(&b.category, &b.display_name, &b.id))
        });
        specs
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn is_source_loaded(&self, locator: &str) -> bool {
        self.sources.contains(locator)
    }

    /// Drop every action and forget every source.
    pub fn reset(&self) {
        info!(actions = self.actions.len(), sources = self.sources.len(), "Resetting action registry");
        self.actions.clear();
        self.sources.clear();
    }

    /// Register all entries of one source, or none of them.
    ///
    /// Every problem in the batch is reported. On failure the source stays
    /// unmarked and existing registrations are untouched.
    pub fn register_source(&self, source: &str, entries: Vec<ActionEntry>) -> Result<Vec<String>, Vec<RegistrationError>> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for entry in &entries {
            errors.extend(check_spec(&entry.spec));

            let id = entry.id();
            if let Some(existing) = self.actions.get(id) {
                errors.push(RegistrationError::DuplicateIdentifier {
                    id: id.to_string(),
                    existing: existing.source.clone(),
                    source_name: source.to_string(),
                });
            } else if !seen.insert(id.to_string()) {
                errors.push(RegistrationError::DuplicateIdentifier {
                    id: id.to_string(),
                    existing: source.to_string(),
                    source_name: source.to_string(),
                });
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            debug!(id = %entry.id(), source = %source, "Registered action");
            ids.push(entry.id().to_string());
            self.actions.insert(
                entry.id().to_string(),
                RegisteredAction {
                    entry,
                    source: source.to_string(),
                },
            );
        }
        self.sources.insert(source.to_string());
        Ok(ids)
    }

    pub(crate) fn mark_source(&self, source: &str) {
        self.sources.insert(source.to_string());
    }
}

fn check_spec(spec: &ActionSpec) -> Vec<RegistrationError> {
    let mut errors = Vec::new();
    if spec.id.trim().is_empty() {
        errors.push(RegistrationError::InvalidSpec(format!(
            "action '{}' has an empty id",
            spec.display_name
        )));
    }
    let mut names = HashSet::new();
    for def in &spec.attrs {
        if !names.insert(def.name.as_str()) {
            errors.push(RegistrationError::DuplicateAttribute {
                action: spec.id.clone(),
                attr: def.name.clone(),
            });
        }
        if let Err(e) = def.check_definition(&spec.id) {
            errors.push(e);
        }
    }
    errors
}
