use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::attributes::AttributeSet;
use crate::blueprint::{ActionBinding, BatchBinding, Blueprint, BuildStep, Settings, StepId, StepKind};
use crate::registry::ActionRegistry;

pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Persisted form of a blueprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub settings: BTreeMap<String, Value>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Children of the root group.
    #[serde(default)]
    pub steps: Vec<StepDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<StepDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDocument {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: AttributeSet,
    #[serde(default, rename = "variantAttrs", skip_serializing_if = "Vec::is_empty")]
    pub variant_attrs: Vec<String>,
    /// Present (even empty) only for batch actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variants: Option<Vec<AttributeSet>>,
}

impl Blueprint {
    pub fn to_document(&self) -> BlueprintDocument {
        BlueprintDocument {
            version: DOCUMENT_VERSION,
            settings: self.settings.as_map().clone(),
            variables: self.variables.clone(),
            steps: self
                .tree
                .children(self.tree.root())
                .iter()
                .map(|c| self.step_document(*c))
                .collect(),
        }
    }

    fn step_document(&self, id: StepId) -> StepDocument {
        let Some(step) = self.tree.step(id) else {
            return StepDocument::default();
        };
        let action = match &step.kind {
            StepKind::Group => None,
            StepKind::Action(binding) => Some(ActionDocument {
                id: binding.action_id.clone(),
                attrs: binding.attrs.clone(),
                variant_attrs: Vec::new(),
                variants: None,
            }),
            StepKind::Batch(batch) => Some(ActionDocument {
                id: batch.base.action_id.clone(),
                attrs: batch.base.attrs.clone(),
                variant_attrs: batch.variant_attrs.clone(),
                variants: Some(batch.variants.clone()),
            }),
        };
        StepDocument {
            name: step.name.clone(),
            disabled: step.disabled,
            action,
            children: step.children().iter().map(|c| self.step_document(*c)).collect(),
        }
    }

    /// Rebuild a blueprint. Unknown action ids become unresolved placeholders
    /// that keep their attribute values.
    pub fn from_document(doc: &BlueprintDocument, registry: &ActionRegistry) -> Result<Self> {
        if doc.version > DOCUMENT_VERSION {
            bail!("blueprint version {} is newer than supported version {}", doc.version, DOCUMENT_VERSION);
        }
        let mut blueprint = Blueprint {
            settings: Settings::new(doc.settings.clone()),
            variables: doc.variables.clone(),
            ..Default::default()
        };

        let root = blueprint.tree.root();
        // pushed in reverse so siblings come off the stack in document order
        let mut stack: Vec<(StepId, &StepDocument)> = doc.steps.iter().rev().map(|s| (root, s)).collect();
        while let Some((parent, step_doc)) = stack.pop() {
            let step = build_step(step_doc, registry)?;
            let id = blueprint.tree.push_child(parent, step)?;
            stack.extend(step_doc.children.iter().rev().map(|c| (id, c)));
        }
        Ok(blueprint)
    }

    pub fn from_yaml_str(content: &str, registry: &ActionRegistry) -> Result<Self> {
        let doc: BlueprintDocument = serde_yaml::from_str(content).context("Failed to deserialize blueprint YAML")?;
        Self::from_document(&doc, registry)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_document()).context("Failed to serialize blueprint")
    }

    /// Load a `.json` or YAML blueprint file.
    pub fn load(path: impl AsRef<Path>, registry: &ActionRegistry) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read blueprint from {}", path.display()))?;
        let doc: BlueprintDocument = if is_json(path) {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to deserialize JSON content from {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to deserialize YAML content from {}", path.display()))?
        };
        debug!(path = %path.display(), steps = doc.steps.len(), "Loaded blueprint document");
        let mut blueprint = Self::from_document(&doc, registry)?;
        blueprint.file = Some(path.to_path_buf());
        Ok(blueprint)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let doc = self.to_document();
        let content = if is_json(path) {
            serde_json::to_string_pretty(&doc)?
        } else {
            serde_yaml::to_string(&doc)?
        };
        fs::write(path, content).with_context(|| format!("Failed to write blueprint to {}", path.display()))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn build_step(doc: &StepDocument, registry: &ActionRegistry) -> Result<BuildStep> {
    let Some(action) = &doc.action else {
        return Ok(BuildStep::group(&doc.name).disabled(doc.disabled));
    };
    if !doc.children.is_empty() {
        bail!("step '{}' declares both an action and children", doc.name);
    }
    if action.variants.is_none() && !action.variant_attrs.is_empty() {
        bail!("step '{}' declares variantAttrs but is not a batch action", doc.name);
    }

    let binding = match registry.spec(&action.id) {
        Some(spec) => ActionBinding {
            action_id: action.id.clone(),
            spec: Some(spec),
            attrs: action.attrs.clone(),
        },
        None => {
            warn!(step = %doc.name, action = %action.id, "Action is not registered, keeping step as unresolved");
            ActionBinding::unresolved(&action.id, action.attrs.clone())
        }
    };

    let step = match &action.variants {
        Some(variants) => BuildStep::batch(
            &doc.name,
            BatchBinding {
                base: binding,
                variant_attrs: action.variant_attrs.clone(),
                variants: variants.clone(),
            },
        ),
        None => BuildStep::action(&doc.name, binding),
    };
    Ok(step.disabled(doc.disabled))
}
