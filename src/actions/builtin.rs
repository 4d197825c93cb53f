use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::actions::{ActionContext, ActionEntry, ActionFactory, ActionSpec, BuildAction};
use crate::attributes::{AttributeDefinition, AttributeValues};
use crate::error::BuildError;
use crate::registry::{ActionModule, ActionPackage};

pub const PACKAGE_LOCATOR: &str = "builtin:core";

const CORE_COLOR: [f32; 3] = [0.55, 0.7, 0.9];
const HIERARCHY_COLOR: [f32; 3] = [0.6, 0.85, 0.55];

#[derive(Debug)]
pub struct LogAction {
    message: String,
    as_warning: bool,
}

impl LogAction {
    pub fn spec() -> ActionSpec {
        ActionSpec::new("Core.Log", "Log")
            .category("Core")
            .color(CORE_COLOR)
            .describe("Write a message to the build log.")
            .attr(AttributeDefinition::new("message", "string"))
            .attr(AttributeDefinition::new("level", "option").options(["info", "warning"]))
    }

    pub fn from_attrs(attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        Ok(Box::new(Self {
            message: attrs.get_str("message")?.to_string(),
            as_warning: attrs.get_option("level")? == 1,
        }))
    }
}

#[async_trait]
impl BuildAction for LogAction {
    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        info!(step = %ctx.step_path, "[LOG] {}", self.message);
        if self.as_warning {
            ctx.warn(self.message.clone());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct CreateNodeAction {
    name: String,
    parent: Option<String>,
    translate: Vec<f64>,
    allow_existing: bool,
}

impl CreateNodeAction {
    pub fn spec() -> ActionSpec {
        ActionSpec::new("Core.CreateNode", "Create Node")
            .category("Core")
            .color(CORE_COLOR)
            .describe("Create a node in the scene, optionally under a parent.")
            .attr(AttributeDefinition::new("name", "string").describe("Name of the new node."))
            .attr(AttributeDefinition::new("parent", "node").optional())
            .attr(AttributeDefinition::new("translate", "vector3"))
            .attr(
                AttributeDefinition::new("allowExisting", "bool")
                    .advanced()
                    .describe("Reuse a node that already exists instead of failing."),
            )
    }

    pub fn from_attrs(attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        Ok(Box::new(Self {
            name: attrs.get_str("name")?.to_string(),
            parent: attrs.get_node("parent")?,
            translate: attrs.get_vector("translate")?,
            allow_existing: attrs.get_bool("allowExisting")?,
        }))
    }
}

#[async_trait]
impl BuildAction for CreateNodeAction {
    fn validate(&self, ctx: &ActionContext<'_>) -> Result<()> {
        if ctx.scene.contains(&self.name) && !self.allow_existing {
            return Err(BuildError::new(format!("node '{}' already exists", self.name)).into());
        }
        Ok(())
    }

    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        if ctx.scene.contains(&self.name) {
            ctx.warn(format!("reusing existing node '{}'", self.name));
            ctx.scene.set_parent(&self.name, self.parent.as_deref())?;
        } else {
            ctx.scene.create_node(&self.name, self.parent.as_deref())?;
            if ctx.rig().is_some() {
                ctx.extend_rig_metadata_list("createdNodes", [json!(self.name)])?;
            }
        }
        ctx.scene.set_attribute(&self.name, "translate", json!(self.translate))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct SetAttributeAction {
    node: Option<String>,
    attr: String,
    value: f64,
}

impl SetAttributeAction {
    pub fn spec() -> ActionSpec {
        ActionSpec::new("Core.SetAttribute", "Set Attribute")
            .category("Core")
            .color(CORE_COLOR)
            .describe("Set a numeric attribute on a node.")
            .attr(AttributeDefinition::new("node", "node"))
            .attr(AttributeDefinition::new("attr", "string"))
            .attr(AttributeDefinition::new("value", "float"))
    }

    pub fn from_attrs(attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        Ok(Box::new(Self {
            node: attrs.get_node("node")?,
            attr: attrs.get_str("attr")?.to_string(),
            value: attrs.get_float("value")?,
        }))
    }
}

#[async_trait]
impl BuildAction for SetAttributeAction {
    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let node = self
            .node
            .as_deref()
            .ok_or_else(|| BuildError::new("no node to set the attribute on"))?;
        ctx.scene.set_attribute(node, &self.attr, json!(self.value))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct ParentAction {
    parent: Option<String>,
    children: Vec<String>,
}

impl ParentAction {
    pub fn spec() -> ActionSpec {
        ActionSpec::new("Core.Parent", "Parent")
            .category("Hierarchy")
            .color(HIERARCHY_COLOR)
            .describe("Parent nodes under another node.")
            .attr(AttributeDefinition::new("parent", "node"))
            .attr(AttributeDefinition::new("children", "nodelist"))
    }

    pub fn from_attrs(attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        Ok(Box::new(Self {
            parent: attrs.get_node("parent")?,
            children: attrs.get_nodes("children")?,
        }))
    }
}

#[async_trait]
impl BuildAction for ParentAction {
    fn validate(&self, _ctx: &ActionContext<'_>) -> Result<()> {
        if let Some(parent) = &self.parent {
            if self.children.contains(parent) {
                return Err(BuildError::new(format!("'{}' cannot be parented to itself", parent)).into());
            }
        }
        Ok(())
    }

    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        if self.children.is_empty() {
            ctx.warn("no children to parent");
        }
        for child in &self.children {
            ctx.scene.set_parent(child, self.parent.as_deref())?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct DeleteNodesAction {
    nodes: Vec<String>,
}

impl DeleteNodesAction {
    pub fn spec() -> ActionSpec {
        ActionSpec::new("Core.DeleteNodes", "Delete Nodes")
            .category("Hierarchy")
            .color(HIERARCHY_COLOR)
            .describe("Delete nodes from the scene. Children move up to the deleted node's parent.")
            .attr(AttributeDefinition::new("nodes", "nodelist"))
    }

    pub fn from_attrs(attrs: &AttributeValues) -> Result<Box<dyn BuildAction>> {
        Ok(Box::new(Self {
            nodes: attrs.get_nodes("nodes")?,
        }))
    }
}

#[async_trait]
impl BuildAction for DeleteNodesAction {
    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        for node in &self.nodes {
            let removed = ctx.scene.remove_node(node)?;
            if !removed.attributes.is_empty() {
                let keys: Vec<&String> = removed.attributes.keys().collect();
                debug!(node = %node, attributes = ?keys, "deleted node with attributes");
            }
        }
        Ok(())
    }
}

/// Native implementations addressable by `impl` key from action manifests.
pub fn implementations() -> Vec<(&'static str, ActionFactory)> {
    fn factory(f: fn(&AttributeValues) -> Result<Box<dyn BuildAction>>) -> ActionFactory {
        std::sync::Arc::new(f)
    }
    vec![
        ("core.log", factory(LogAction::from_attrs)),
        ("core.create_node", factory(CreateNodeAction::from_attrs)),
        ("core.set_attribute", factory(SetAttributeAction::from_attrs)),
        ("core.parent", factory(ParentAction::from_attrs)),
        ("core.delete_nodes", factory(DeleteNodesAction::from_attrs)),
    ]
}

struct StaticModule {
    name: &'static str,
    entries: fn() -> Vec<ActionEntry>,
}

impl ActionModule for StaticModule {
    fn name(&self) -> &str {
        self.name
    }

    fn load(&self) -> Result<Vec<ActionEntry>> {
        Ok((self.entries)())
    }
}

/// The actions shipped with the pipeline.
#[derive(Debug, Default)]
pub struct CoreActions;

impl ActionPackage for CoreActions {
    fn locator(&self) -> &str {
        PACKAGE_LOCATOR
    }

    fn modules(&self) -> Vec<Box<dyn ActionModule>> {
        vec![
            Box::new(StaticModule {
                name: "core.log",
                entries: || vec![ActionEntry::new(LogAction::spec(), LogAction::from_attrs)],
            }),
            Box::new(StaticModule {
                name: "core.nodes",
                entries: || {
                    vec![
                        ActionEntry::new(CreateNodeAction::spec(), CreateNodeAction::from_attrs),
                        ActionEntry::new(SetAttributeAction::spec(), SetAttributeAction::from_attrs),
                    ]
                },
            }),
            Box::new(StaticModule {
                name: "core.hierarchy",
                entries: || {
                    vec![
                        ActionEntry::new(ParentAction::spec(), ParentAction::from_attrs),
                        ActionEntry::new(DeleteNodesAction::spec(), DeleteNodesAction::from_attrs),
                    ]
                },
            }),
        ]
    }
}
