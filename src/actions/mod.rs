use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::attributes::{AttributeDefinition, AttributeValues};
use crate::blueprint::Settings;
use crate::error::SceneError;
use crate::runtime::scene::Scene;

pub mod builtin;

/// Linear RGB display color of an action in palettes and trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color(pub [f32; 3]);

impl Default for Color {
    fn default() -> Self {
        Color([1.0, 1.0, 1.0])
    }
}

/// Declarative metadata for one action type.
///
/// This is the schema consulted by validation and by any presentation layer;
/// it carries no executable code so tooling can introspect it freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    /// Namespaced, globally unique id, e.g. `"Core.CreateNode"`.
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub color: Color,
    #[serde(default)]
    pub attrs: Vec<AttributeDefinition>,
    #[serde(default)]
    pub description: String,
    /// A failure of this action abandons the rest of its parent group.
    #[serde(default)]
    pub non_recoverable: bool,
}

impl ActionSpec {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            category: String::new(),
            color: Color::default(),
            attrs: Vec::new(),
            description: String::new(),
            non_recoverable: false,
        }
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn color(mut self, rgb: [f32; 3]) -> Self {
        self.color = Color(rgb);
        self
    }

    pub fn attr(mut self, def: AttributeDefinition) -> Self {
        self.attrs.push(def);
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    pub fn non_recoverable(mut self) -> Self {
        self.non_recoverable = true;
        self
    }

    pub fn find_attr(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// Everything a running action can see and touch.
pub struct ActionContext<'a> {
    pub attrs: AttributeValues,
    pub scene: &'a mut Scene,
    pub settings: &'a Settings,
    pub variables: &'a BTreeMap<String, Value>,
    /// Full path of the step being executed.
    pub step_path: String,
    /// Index of the batch variant, when expanded from a batch step.
    pub variant: Option<usize>,
    rig: Option<String>,
    warnings: Vec<String>,
}

impl<'a> ActionContext<'a> {
    pub fn new(
        attrs: AttributeValues,
        scene: &'a mut Scene,
        settings: &'a Settings,
        variables: &'a BTreeMap<String, Value>,
        step_path: String,
        variant: Option<usize>,
        rig: Option<String>,
    ) -> Self {
        Self {
            attrs,
            scene,
            settings,
            variables,
            step_path,
            variant,
            rig,
            warnings: Vec::new(),
        }
    }

    /// Name of the rig node being built. `None` when only validating.
    pub fn rig(&self) -> Option<&str> {
        self.rig.as_deref()
    }

    pub fn rig_metadata(&self) -> BTreeMap<String, Value> {
        self.rig
            .as_deref()
            .and_then(|rig| self.scene.metadata(rig))
            .cloned()
            .unwrap_or_default()
    }

    pub fn update_rig_metadata(&mut self, data: impl IntoIterator<Item = (String, Value)>) -> Result<(), SceneError> {
        let rig = self.rig.as_deref().ok_or(SceneError::NoRig)?;
        self.scene.update_metadata(rig, data)
    }

    /// Append `items` to a list value, skipping ones already present.
    pub fn extend_rig_metadata_list(
        &mut self,
        key: &str,
        items: impl IntoIterator<Item = Value>,
    ) -> Result<(), SceneError> {
        let mut list = match self.rig_metadata().remove(key) {
            Some(Value::Array(list)) => list,
            _ => Vec::new(),
        };
        for item in items {
            if !list.contains(&item) {
                list.push(item);
            }
        }
        self.update_rig_metadata([(key.to_string(), Value::Array(list))])
    }

    /// Merge `data` into an object value.
    pub fn update_rig_metadata_dict(&mut self, key: &str, data: Map<String, Value>) -> Result<(), SceneError> {
        let mut object = match self.rig_metadata().remove(key) {
            Some(Value::Object(object)) => object,
            _ => Map::new(),
        };
        object.extend(data);
        self.update_rig_metadata([(key.to_string(), Value::Object(object))])
    }

    /// Report a non-fatal problem. The step finishes with a Warning status.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}

/// A runtime action bound to one set of attribute values.
///
/// Return a [`crate::error::BuildError`] from `validate` or `run` for a modeled
/// failure; any other error is treated as a bug in the action.
#[async_trait]
pub trait BuildAction: Send + Debug {
    /// Action-specific semantic checks. Called before `run`, never mutates.
    fn validate(&self, _ctx: &ActionContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()>;
}

/// Builds an action instance from resolved attribute values.
pub type ActionFactory = Arc<dyn Fn(&AttributeValues) -> Result<Box<dyn BuildAction>> + Send + Sync>;

/// A spec paired with the factory that implements it.
#[derive(Clone)]
pub struct ActionEntry {
    pub spec: Arc<ActionSpec>,
    pub factory: ActionFactory,
}

impl ActionEntry {
    pub fn new<F>(spec: ActionSpec, factory: F) -> Self
    where
        F: Fn(&AttributeValues) -> Result<Box<dyn BuildAction>> + Send + Sync + 'static,
    {
        Self {
            spec: Arc::new(spec),
            factory: Arc::new(factory),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn create(&self, attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        (self.factory)(attrs)
    }
}

impl Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionEntry").field("id", &self.spec.id).finish()
    }
}
