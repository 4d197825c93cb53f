use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attributes::NodeLookup;
use crate::error::SceneError;

/// One object in the scene graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    /// Build bookkeeping, kept apart from the node's own attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// The execution target: a named object graph that actions mutate.
///
/// Nodes are addressed by unique name. The engine holds the only `&mut` for
/// the duration of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    nodes: BTreeMap<String, SceneNode>,
}

impl Scene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&SceneNode> {
        self.nodes.get(name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }

    pub fn create_node(&mut self, name: &str, parent: Option<&str>) -> Result<(), SceneError> {
        if self.nodes.contains_key(name) {
            return Err(SceneError::NodeExists(name.to_string()));
        }
        if let Some(p) = parent {
            if !self.nodes.contains_key(p) {
                return Err(SceneError::NodeNotFound(p.to_string()));
            }
        }
        self.nodes.insert(
            name.to_string(),
            SceneNode {
                parent: parent.map(str::to_string),
                ..Default::default()
            },
        );
        Ok(())
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|n| n.parent.as_deref())
    }

    pub fn children_of(&self, name: &str) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.parent.as_deref() == Some(name))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn set_parent(&mut self, child: &str, parent: Option<&str>) -> Result<(), SceneError> {
        if !self.nodes.contains_key(child) {
            return Err(SceneError::NodeNotFound(child.to_string()));
        }
        if let Some(p) = parent {
            if !self.nodes.contains_key(p) {
                return Err(SceneError::NodeNotFound(p.to_string()));
            }
            // walk up from the new parent; meeting the child means a cycle
            let mut cursor = Some(p);
            while let Some(current) = cursor {
                if current == child {
                    return Err(SceneError::ParentCycle {
                        child: child.to_string(),
                        parent: p.to_string(),
                    });
                }
                cursor = self.parent_of(current);
            }
        }
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = parent.map(str::to_string);
        }
        Ok(())
    }

    pub fn set_attribute(&mut self, node: &str, attr: &str, value: Value) -> Result<(), SceneError> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| SceneError::NodeNotFound(node.to_string()))?;
        entry.attributes.insert(attr.to_string(), value);
        Ok(())
    }

    pub fn get_attribute(&self, node: &str, attr: &str) -> Option<&Value> {
        self.nodes.get(node).and_then(|n| n.attributes.get(attr))
    }

    pub fn metadata(&self, node: &str) -> Option<&BTreeMap<String, Value>> {
        self.nodes.get(node).map(|n| &n.metadata)
    }

    /// Merge `data` into a node's metadata, replacing existing keys.
    pub fn update_metadata(
        &mut self,
        node: &str,
        data: impl IntoIterator<Item = (String, Value)>,
    ) -> Result<(), SceneError> {
        let entry = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| SceneError::NodeNotFound(node.to_string()))?;
        entry.metadata.extend(data);
        Ok(())
    }

    /// Remove a node. Its children are reparented to its parent.
    pub fn remove_node(&mut self, name: &str) -> Result<SceneNode, SceneError> {
        let removed = self
            .nodes
            .remove(name)
            .ok_or_else(|| SceneError::NodeNotFound(name.to_string()))?;
        for node in self.nodes.values_mut() {
            if node.parent.as_deref() == Some(name) {
                node.parent = removed.parent.clone();
            }
        }
        Ok(removed)
    }
}

impl NodeLookup for Scene {
    fn contains_node(&self, name: &str) -> bool {
        self.contains(name)
    }
}
