//! The blueprint: a step tree plus the settings and variables its attributes
//! can refer to.

pub mod builder;
pub mod document;
pub mod step;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::actions::ActionSpec;
use crate::attributes::{self, AttributeSet, AttributeValues, NodeLookup, expr};
use crate::error::{EditError, Severity, StepError, StructureError, UnresolvedActionError, ValidationError};
use crate::registry::ActionRegistry;

pub use builder::{ActionBuilder, BlueprintBuilder};
pub use document::{ActionDocument, BlueprintDocument, StepDocument};
pub use step::{ActionBinding, BatchBinding, BuildStep, StepId, StepKind, StepResult, StepStatus, StepTree};

pub const RIG_NAME: &str = "rigName";
pub const RIG_NODE_NAME_FORMAT: &str = "rigNodeNameFormat";
pub const DEBUG_BUILD: &str = "debugBuild";

const DEFAULT_RIG_NODE_NAME_FORMAT: &str = "{rigName}_rig";

/// Free-form blueprint settings. Only explicitly set keys are stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings(BTreeMap<String, Value>);

impl Settings {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    /// Fill in keys that are not already set.
    pub fn merge_defaults(&mut self, defaults: &BTreeMap<String, Value>) {
        for (k, v) in defaults {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn rig_name(&self) -> &str {
        self.get(RIG_NAME).and_then(Value::as_str).unwrap_or("")
    }

    pub fn rig_node_name_format(&self) -> &str {
        self.get(RIG_NODE_NAME_FORMAT)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_RIG_NODE_NAME_FORMAT)
    }

    /// Name of the top-level rig node, e.g. `"hero_rig"`.
    pub fn rig_node_name(&self) -> String {
        self.rig_node_name_format().replace("{rigName}", self.rig_name())
    }

    pub fn debug_build(&self) -> bool {
        self.get(DEBUG_BUILD).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// One problem found by static validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    #[serde(skip)]
    pub step: StepId,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<usize>,
    pub severity: Severity,
    #[serde(serialize_with = "display_string")]
    pub error: StepError,
}

fn display_string<S: serde::Serializer>(error: &StepError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

impl ValidationIssue {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Resolve expressions and check every attribute of `spec` against the
/// explicitly set values in `attrs`, falling back to defaults.
///
/// Keys that `spec` does not declare are ignored here.
pub fn resolve_attributes(
    spec: &ActionSpec,
    attrs: &AttributeSet,
    variables: &BTreeMap<String, Value>,
    nodes: Option<&dyn NodeLookup>,
) -> Result<AttributeValues, Vec<ValidationError>> {
    let mut resolved = BTreeMap::new();
    let mut errors = Vec::new();
    for def in &spec.attrs {
        let raw = attrs.get(&def.name).cloned().unwrap_or_else(|| def.default_or_type());
        let value = match expr::resolve(&def.name, &raw, variables) {
            Ok(value) => value,
            Err(e) => {
                errors.push(e);
                continue;
            }
        };
        match attributes::validate(def, &value, nodes) {
            Ok(()) => {
                resolved.insert(def.name.clone(), value);
            }
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() {
        Ok(AttributeValues::new(resolved))
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blueprint {
    pub settings: Settings,
    pub variables: BTreeMap<String, Value>,
    pub tree: StepTree,
    /// File the blueprint was loaded from, if any.
    pub file: Option<PathBuf>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> StepId {
        self.tree.root()
    }

    /// An action step for `action_id`, unresolved if the registry lacks it.
    pub fn action_step(registry: &ActionRegistry, name: &str, action_id: &str) -> BuildStep {
        BuildStep::action(name, Self::binding_for(registry, action_id))
    }

    pub fn batch_step(registry: &ActionRegistry, name: &str, action_id: &str) -> BuildStep {
        BuildStep::batch(name, BatchBinding::new(Self::binding_for(registry, action_id)))
    }

    fn binding_for(registry: &ActionRegistry, action_id: &str) -> ActionBinding {
        match registry.spec(action_id) {
            Some(spec) => ActionBinding::new(spec),
            None => ActionBinding::unresolved(action_id, AttributeSet::new()),
        }
    }

    /// Re-bind every action step to the spec `registry` currently holds.
    ///
    /// Placeholders whose action is now registered become resolved, stale
    /// specs are replaced, and steps whose action is gone become
    /// placeholders. Returns the number of placeholders resolved.
    pub fn resolve_actions(&mut self, registry: &ActionRegistry) -> usize {
        let mut count = 0;
        for id in self.tree.descendants(self.tree.root()) {
            let Ok(step) = self.tree.get_mut(id) else { continue };
            let Some(binding) = step.binding_mut() else { continue };
            let was_resolved = binding.is_resolved();
            binding.spec = registry.spec(&binding.action_id);
            count += usize::from(!was_resolved && binding.is_resolved());
        }
        count
    }

    /// Checks that decide whether a build can start at all, independent of
    /// any step.
    pub fn pre_build_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if self.settings.rig_name().trim().is_empty() {
            issues.push(ValidationIssue {
                step: self.tree.root(),
                path: String::new(),
                variant: None,
                severity: Severity::Error,
                error: ValidationError::Required {
                    attr: RIG_NAME.to_string(),
                }
                .into(),
            });
        }
        issues
    }

    fn spec_of(&self, step: StepId) -> Result<Arc<ActionSpec>, EditError> {
        let binding = self
            .tree
            .get(step)?
            .binding()
            .ok_or_else(|| StructureError::NotAnAction(self.tree.path(step)))?;
        binding
            .spec
            .clone()
            .ok_or_else(|| EditError::from(UnresolvedActionError { action_id: binding.action_id.clone() }))
    }

    /// Current value of an attribute: the explicit value, else the default.
    pub fn get_attr(&self, step: StepId, name: &str) -> Result<Value, EditError> {
        let spec = self.spec_of(step)?;
        let def = spec
            .find_attr(name)
            .ok_or_else(|| ValidationError::UnknownAttribute { attr: name.to_string() })?;
        let binding = self.tree.get(step)?.binding();
        Ok(binding
            .and_then(|b| b.attrs.get(name))
            .cloned()
            .unwrap_or_else(|| def.default_or_type()))
    }

    /// Set an attribute after checking it. An invalid value leaves the
    /// previous one in place.
    pub fn set_attr(&mut self, step: StepId, name: &str, value: Value) -> Result<(), EditError> {
        let spec = self.spec_of(step)?;
        self.check_attr(&spec, name, &value)?;
        if let Some(binding) = self.tree.get_mut(step)?.binding_mut() {
            binding.attrs.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Drop an explicit value so the attribute falls back to its default.
    pub fn reset_attr(&mut self, step: StepId, name: &str) -> Result<Option<Value>, EditError> {
        let path = self.tree.path(step);
        let binding = self
            .tree
            .get_mut(step)?
            .binding_mut()
            .ok_or(StructureError::NotAnAction(path))?;
        Ok(binding.attrs.remove(name))
    }

    fn check_attr(&self, spec: &ActionSpec, name: &str, value: &Value) -> Result<(), ValidationError> {
        let def = spec
            .find_attr(name)
            .ok_or_else(|| ValidationError::UnknownAttribute { attr: name.to_string() })?;
        // expressions are stored verbatim; only their result is checked
        let resolved = expr::resolve(name, value, &self.variables)?;
        attributes::check_value(def, &resolved)
    }

    fn batch_mut(&mut self, step: StepId) -> Result<&mut BatchBinding, EditError> {
        let path = self.tree.path(step);
        match &mut self.tree.get_mut(step)?.kind {
            StepKind::Batch(batch) => Ok(batch),
            _ => Err(StructureError::NotABatch(path).into()),
        }
    }

    /// Append a variant and return its index.
    pub fn add_variant(&mut self, step: StepId) -> Result<usize, EditError> {
        let batch = self.batch_mut(step)?;
        batch.variants.push(AttributeSet::new());
        Ok(batch.variants.len() - 1)
    }

    pub fn remove_variant(&mut self, step: StepId, index: usize) -> Result<AttributeSet, EditError> {
        let batch = self.batch_mut(step)?;
        let len = batch.variants.len();
        if index >= len {
            return Err(StructureError::VariantOutOfBounds { index, len }.into());
        }
        Ok(batch.variants.remove(index))
    }

    pub fn set_variant_attr(&mut self, step: StepId, index: usize, name: &str, value: Value) -> Result<(), EditError> {
        let spec = self.spec_of(step)?;
        self.check_attr(&spec, name, &value)?;
        let batch = self.batch_mut(step)?;
        let len = batch.variants.len();
        let variant = batch
            .variants
            .get_mut(index)
            .ok_or(StructureError::VariantOutOfBounds { index, len })?;
        variant.insert(name.to_string(), value);
        Ok(())
    }

    /// Mark an attribute as varying per variant, or make it shared again.
    ///
    /// Turning it on moves the base value into every variant that lacks
    /// one; turning it off keeps the first variant's value as the base.
    pub fn set_variant_attr_enabled(&mut self, step: StepId, name: &str, enabled: bool) -> Result<(), EditError> {
        let spec = self.spec_of(step)?;
        if spec.find_attr(name).is_none() {
            return Err(ValidationError::UnknownAttribute { attr: name.to_string() }.into());
        }
        let batch = self.batch_mut(step)?;
        let is_variant = batch.variant_attrs.iter().any(|a| a == name);
        if enabled && !is_variant {
            batch.variant_attrs.push(name.to_string());
            if let Some(value) = batch.base.attrs.remove(name) {
                for variant in &mut batch.variants {
                    variant.entry(name.to_string()).or_insert_with(|| value.clone());
                }
            }
        } else if !enabled && is_variant {
            batch.variant_attrs.retain(|a| a != name);
            let first = batch.variants.first().and_then(|v| v.get(name)).cloned();
            for variant in &mut batch.variants {
                variant.remove(name);
            }
            if let Some(value) = first {
                batch.base.attrs.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Static check of the whole tree in pre-order. Node references are not
    /// resolved here since earlier steps may create them.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        self.validate_with(None)
    }

    pub fn validate_with(&self, nodes: Option<&dyn NodeLookup>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        for id in self.tree.enabled_preorder() {
            let Some(step) = self.tree.step(id) else { continue };
            let path = self.tree.path(id);
            let mut push = |severity: Severity, variant: Option<usize>, error: StepError| {
                issues.push(ValidationIssue {
                    step: id,
                    path: path.clone(),
                    variant,
                    severity,
                    error,
                });
            };

            match &step.kind {
                StepKind::Group => {
                    if id != self.tree.root() && step.children().is_empty() {
                        push(Severity::Warning, None, StepError::Other("group is empty".to_string()));
                    }
                }
                StepKind::Action(binding) => {
                    let Some(spec) = &binding.spec else {
                        push(Severity::Error, None, unresolved(binding));
                        continue;
                    };
                    for key in unknown_keys(spec, &binding.attrs) {
                        push(Severity::Warning, None, ValidationError::UnknownAttribute { attr: key }.into());
                    }
                    if let Err(errors) = resolve_attributes(spec, &binding.attrs, &self.variables, nodes) {
                        for e in errors {
                            push(Severity::Error, None, e.into());
                        }
                    }
                }
                StepKind::Batch(batch) => {
                    let Some(spec) = &batch.base.spec else {
                        push(Severity::Error, None, unresolved(&batch.base));
                        continue;
                    };
                    for key in unknown_keys(spec, &batch.base.attrs) {
                        push(Severity::Warning, None, ValidationError::UnknownAttribute { attr: key }.into());
                    }
                    for name in &batch.variant_attrs {
                        if spec.find_attr(name).is_none() {
                            push(Severity::Warning, None, ValidationError::UnknownAttribute { attr: name.clone() }.into());
                        } else if batch.base.attrs.contains_key(name) {
                            push(
                                Severity::Warning,
                                None,
                                StepError::Other(format!("'{}' varies per variant but also has a shared value", name)),
                            );
                        }
                    }
                    for (i, variant) in batch.variants.iter().enumerate() {
                        for key in unknown_keys(spec, variant) {
                            push(Severity::Warning, Some(i), ValidationError::UnknownAttribute { attr: key }.into());
                        }
                    }
                    for (i, merged) in batch.expand().enumerate() {
                        if let Err(errors) = resolve_attributes(spec, &merged, &self.variables, nodes) {
                            for e in errors {
                                push(Severity::Error, Some(i), e.into());
                            }
                        }
                    }
                }
            }
        }
        issues
    }
}

fn unresolved(binding: &ActionBinding) -> StepError {
    UnresolvedActionError {
        action_id: binding.action_id.clone(),
    }
    .into()
}

fn unknown_keys(spec: &ActionSpec, attrs: &AttributeSet) -> Vec<String> {
    attrs
        .keys()
        .filter(|k| spec.find_attr(k).is_none())
        .cloned()
        .collect()
}
