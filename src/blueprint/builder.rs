use serde_json::Value;

use crate::attributes::AttributeSet;
use crate::blueprint::{Blueprint, BuildStep, StepId, StepKind};
use crate::registry::ActionRegistry;

/// Fluent construction of a blueprint. Attribute values are stored as
/// given and only checked by [`Blueprint::validate`].
pub struct BlueprintBuilder<'r> {
    registry: &'r ActionRegistry,
    blueprint: Blueprint,
    groups: Vec<StepId>,
}

impl<'r> BlueprintBuilder<'r> {
    pub fn new(registry: &'r ActionRegistry) -> Self {
        let blueprint = Blueprint::new();
        let root = blueprint.root();
        Self {
            registry,
            blueprint,
            groups: vec![root],
        }
    }

    pub fn setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.blueprint.settings.set(key, value);
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.blueprint.variables.insert(key.to_string(), value.into());
        self
    }

    fn current(&self) -> StepId {
        self.groups.last().copied().unwrap_or_else(|| self.blueprint.root())
    }

    fn push(&mut self, step: BuildStep) -> Option<StepId> {
        let parent = self.current();
        self.blueprint.tree.add_child(parent, step, None).ok()
    }

    /// Open a group; steps added until [`end`](Self::end) go inside it.
    pub fn group(mut self, name: &str) -> Self {
        if let Some(id) = self.push(BuildStep::group(name)) {
            self.groups.push(id);
        }
        self
    }

    pub fn end(mut self) -> Self {
        if self.groups.len() > 1 {
            self.groups.pop();
        }
        self
    }

    pub fn action(self, name: &str, action_id: &str) -> ActionBuilder<'r> {
        let step = Blueprint::action_step(self.registry, name, action_id);
        ActionBuilder {
            builder: self,
            step,
            variants: None,
        }
    }

    pub fn batch(self, name: &str, action_id: &str) -> ActionBuilder<'r> {
        let step = Blueprint::batch_step(self.registry, name, action_id);
        ActionBuilder {
            builder: self,
            step,
            variants: Some(Vec::new()),
        }
    }

    pub fn build(self) -> Blueprint {
        self.blueprint
    }
}

pub struct ActionBuilder<'r> {
    builder: BlueprintBuilder<'r>,
    step: BuildStep,
    variants: Option<Vec<AttributeSet>>,
}

impl<'r> ActionBuilder<'r> {
    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        if let Some(binding) = self.step.binding_mut() {
            binding.attrs.insert(name.to_string(), value.into());
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        self.step.disabled = true;
        self
    }

    /// Mark an attribute as varying per variant. Batch steps only.
    pub fn variant_attr(mut self, name: &str) -> Self {
        if let StepKind::Batch(batch) = &mut self.step.kind {
            batch.variant_attrs.push(name.to_string());
        }
        self
    }

    /// Add one variant of overrides. Batch steps only.
    pub fn variant<K: Into<String>>(mut self, overrides: impl IntoIterator<Item = (K, Value)>) -> Self {
        if let Some(variants) = &mut self.variants {
            variants.push(overrides.into_iter().map(|(k, v)| (k.into(), v)).collect());
        }
        self
    }

    pub fn build(mut self) -> BlueprintBuilder<'r> {
        if let (StepKind::Batch(batch), Some(variants)) = (&mut self.step.kind, self.variants) {
            batch.variants = variants;
        }
        self.builder.push(self.step);
        self.builder
    }
}
