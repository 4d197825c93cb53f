use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::actions::ActionSpec;
use crate::attributes::AttributeSet;
use crate::error::StructureError;

/// Stable handle to a step inside one [`StepTree`].
///
/// Slots are reused after removal; the generation keeps a handle to a
/// removed step from resolving to whatever takes its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId {
    index: usize,
    generation: u32,
}

impl StepId {
    pub fn index(self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StepStatus {
    #[default]
    NotRun,
    Running,
    Success,
    Warning,
    Error,
}

/// Outcome of the most recent run of a step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub messages: Vec<String>,
    /// Per-variant results of a batch step, in variant order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<StepResult>,
}

impl StepResult {
    pub fn with_status(status: StepStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            messages: vec![message.into()],
            variants: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == StepStatus::Error
    }

    /// Error if any part errored, else Warning if any warned, else Success.
    pub fn roll_up<'a>(parts: impl IntoIterator<Item = &'a StepStatus>) -> StepStatus {
        let mut status = StepStatus::Success;
        for part in parts {
            match part {
                StepStatus::Error => return StepStatus::Error,
                StepStatus::Warning => status = StepStatus::Warning,
                _ => {}
            }
        }
        status
    }
}

/// An action reference plus the attribute values explicitly set on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionBinding {
    pub action_id: String,
    /// `None` while the id has no registered spec.
    pub spec: Option<Arc<ActionSpec>>,
    pub attrs: AttributeSet,
}

impl ActionBinding {
    pub fn new(spec: Arc<ActionSpec>) -> Self {
        Self {
            action_id: spec.id.clone(),
            spec: Some(spec),
            attrs: AttributeSet::new(),
        }
    }

    pub fn unresolved(action_id: &str, attrs: AttributeSet) -> Self {
        Self {
            action_id: action_id.to_string(),
            spec: None,
            attrs,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.spec.is_some()
    }
}

/// A batch action: the base binding expanded once per variant.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchBinding {
    pub base: ActionBinding,
    /// Attributes expected to differ between variants.
    pub variant_attrs: Vec<String>,
    pub variants: Vec<AttributeSet>,
}

impl BatchBinding {
    pub fn new(base: ActionBinding) -> Self {
        Self {
            base,
            variant_attrs: Vec::new(),
            variants: Vec::new(),
        }
    }

    /// Base attributes overridden by variant `index`.
    pub fn variant_set(&self, index: usize) -> Option<AttributeSet> {
        let overrides = self.variants.get(index)?;
        let mut attrs = self.base.attrs.clone();
        attrs.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Some(attrs)
    }

    /// Lazily yields one merged attribute set per variant.
    pub fn expand(&self) -> impl Iterator<Item = AttributeSet> + '_ {
        (0..self.variants.len()).filter_map(move |i| self.variant_set(i))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    Group,
    Action(ActionBinding),
    Batch(BatchBinding),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildStep {
    pub name: String,
    pub disabled: bool,
    pub kind: StepKind,
    pub result: StepResult,
    parent: Option<StepId>,
    children: Vec<StepId>,
}

impl BuildStep {
    pub fn group(name: &str) -> Self {
        Self::with_kind(name, StepKind::Group)
    }

    pub fn action(name: &str, binding: ActionBinding) -> Self {
        Self::with_kind(name, StepKind::Action(binding))
    }

    pub fn batch(name: &str, batch: BatchBinding) -> Self {
        Self::with_kind(name, StepKind::Batch(batch))
    }

    fn with_kind(name: &str, kind: StepKind) -> Self {
        Self {
            name: name.to_string(),
            disabled: false,
            kind,
            result: StepResult::default(),
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, StepKind::Group)
    }

    pub fn parent(&self) -> Option<StepId> {
        self.parent
    }

    pub fn children(&self) -> &[StepId] {
        &self.children
    }

    /// The single-action binding, or a batch's base binding.
    pub fn binding(&self) -> Option<&ActionBinding> {
        match &self.kind {
            StepKind::Group => None,
            StepKind::Action(binding) => Some(binding),
            StepKind::Batch(batch) => Some(&batch.base),
        }
    }

    pub fn binding_mut(&mut self) -> Option<&mut ActionBinding> {
        match &mut self.kind {
            StepKind::Group => None,
            StepKind::Action(binding) => Some(binding),
            StepKind::Batch(batch) => Some(&mut batch.base),
        }
    }

    pub fn action_id(&self) -> Option<&str> {
        self.binding().map(|b| b.action_id.as_str())
    }

    /// "Name (n)" for groups, "Name (xN)" for batches.
    pub fn display_name(&self) -> String {
        match &self.kind {
            StepKind::Group => format!("{} ({})", self.name, self.children.len()),
            StepKind::Action(_) => self.name.clone(),
            StepKind::Batch(batch) => format!("{} (x{})", self.name, batch.variants.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    generation: u32,
    step: Option<BuildStep>,
}

/// Arena-backed step hierarchy with a single group root.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTree {
    slots: Vec<Slot>,
    /// Indices of emptied slots, reused by the next insert.
    free: Vec<usize>,
    root: StepId,
}

impl Default for StepTree {
    fn default() -> Self {
        Self::new()
    }
}

impl StepTree {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                generation: 0,
                step: Some(BuildStep::group("Root")),
            }],
            free: Vec::new(),
            root: StepId { index: 0, generation: 0 },
        }
    }

    pub fn root(&self) -> StepId {
        self.root
    }

    /// Number of live steps, root included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.step.is_some()).count()
    }

    /// Allocated slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    pub fn step(&self, id: StepId) -> Option<&BuildStep> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.step.as_ref())
    }

    pub fn get(&self, id: StepId) -> Result<&BuildStep, StructureError> {
        self.step(id).ok_or_else(|| StructureError::StepNotFound(format!("#{}", id.index)))
    }

    pub fn get_mut(&mut self, id: StepId) -> Result<&mut BuildStep, StructureError> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.step.as_mut())
            .ok_or_else(|| StructureError::StepNotFound(format!("#{}", id.index)))
    }

    pub fn children(&self, id: StepId) -> &[StepId] {
        self.step(id).map(BuildStep::children).unwrap_or(&[])
    }

    pub fn parent(&self, id: StepId) -> Option<StepId> {
        self.step(id).and_then(BuildStep::parent)
    }

    /// Insert `step` under `parent` at `index` (append when `None`).
    /// The name is made unique among its new siblings.
    pub fn add_child(&mut self, parent: StepId, mut step: BuildStep, index: Option<usize>) -> Result<StepId, StructureError> {
        let index = self.check_insert(parent, index, None)?;
        step.name = self.unique_name(parent, &step.name, None);
        Ok(self.attach(parent, step, index))
    }

    /// Append without renaming. Used when rebuilding a tree from a document.
    pub(crate) fn push_child(&mut self, parent: StepId, step: BuildStep) -> Result<StepId, StructureError> {
        let index = self.check_insert(parent, None, None)?;
        Ok(self.attach(parent, step, index))
    }

    fn check_insert(&self, parent: StepId, index: Option<usize>, moving: Option<StepId>) -> Result<usize, StructureError> {
        let target = self.get(parent)?;
        if !target.is_group() {
            return Err(StructureError::NotAGroup(self.path(parent)));
        }
        let mut len = target.children.len();
        if moving.is_some_and(|m| target.children.contains(&m)) {
            len -= 1;
        }
        match index {
            None => Ok(len),
            Some(i) if i <= len => Ok(i),
            Some(i) => Err(StructureError::IndexOutOfBounds { index: i, len }),
        }
    }

    fn attach(&mut self, parent: StepId, mut step: BuildStep, index: usize) -> StepId {
        step.parent = Some(parent);
        step.children.clear();
        let id = match self.free.pop().and_then(|i| self.slots.get_mut(i).map(|slot| (i, slot))) {
            Some((i, slot)) => {
                slot.step = Some(step);
                StepId {
                    index: i,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    step: Some(step),
                });
                StepId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        if let Ok(p) = self.get_mut(parent) {
            p.children.insert(index, id);
        }
        id
    }

    /// Remove a step and its whole subtree. Returns the removed step.
    pub fn remove(&mut self, id: StepId) -> Result<BuildStep, StructureError> {
        if id == self.root {
            return Err(StructureError::RootImmutable);
        }
        let parent = self.get(id)?.parent;
        if let Some(p) = parent {
            if let Ok(p) = self.get_mut(p) {
                p.children.retain(|c| *c != id);
            }
        }
        let subtree = self.descendants(id);
        let mut removed = None;
        for step_id in subtree {
            let Some(slot) = self.slots.get_mut(step_id.index) else { continue };
            let taken = slot.step.take();
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(step_id.index);
            if step_id == id {
                removed = taken;
            }
        }
        removed.ok_or_else(|| StructureError::StepNotFound(format!("#{}", id.index)))
    }

    /// Reparent `id` under `new_parent` at `index`, counted after `id` is
    /// detached. On error the tree is unchanged.
    pub fn move_step(&mut self, id: StepId, new_parent: StepId, index: Option<usize>) -> Result<(), StructureError> {
        if id == self.root {
            return Err(StructureError::RootImmutable);
        }
        self.get(id)?;
        if self.is_ancestor_or_self(id, new_parent) {
            return Err(StructureError::Cycle {
                step: self.path(id),
                target: self.path(new_parent),
            });
        }
        let index = self.check_insert(new_parent, index, Some(id))?;
        let name = {
            let current = &self.get(id)?.name;
            self.unique_name(new_parent, current, Some(id))
        };

        if let Some(old) = self.parent(id) {
            if let Ok(p) = self.get_mut(old) {
                p.children.retain(|c| *c != id);
            }
        }
        if let Ok(p) = self.get_mut(new_parent) {
            p.children.insert(index, id);
        }
        let step = self.get_mut(id)?;
        step.parent = Some(new_parent);
        step.name = name;
        Ok(())
    }

    pub fn rename(&mut self, id: StepId, name: &str) -> Result<(), StructureError> {
        let unique = match self.parent(id) {
            Some(parent) => self.unique_name(parent, name, Some(id)),
            None => name.to_string(),
        };
        self.get_mut(id)?.name = unique;
        Ok(())
    }

    /// True if `ancestor` is `id` or lies on the path from `id` to the root.
    pub fn is_ancestor_or_self(&self, ancestor: StepId, id: StepId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// `name`, or `name` with an incremented numeric suffix if a sibling
    /// already uses it.
    pub fn unique_name(&self, parent: StepId, name: &str, exclude: Option<StepId>) -> String {
        let taken: HashSet<&str> = self
            .children(parent)
            .iter()
            .filter(|c| Some(**c) != exclude)
            .filter_map(|c| self.step(*c))
            .map(|s| s.name.as_str())
            .collect();
        if !taken.contains(name) {
            return name.to_string();
        }

        let (stem, start) = match name.rsplit_once(' ') {
            Some((stem, n)) if !stem.is_empty() => match n.parse::<u32>() {
                Ok(n) => (stem, n + 1),
                Err(_) => (name, 1),
            },
            _ => (name, 1),
        };
        (start..)
            .map(|n| format!("{} {}", stem, n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_else(|| name.to_string())
    }

    /// Slash-separated names from below the root, e.g. `"Arm/Ctl"`.
    pub fn path(&self, id: StepId) -> String {
        let mut names = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == self.root {
                break;
            }
            match self.step(current) {
                Some(step) => names.push(step.name.as_str()),
                None => break,
            }
            cursor = self.parent(current);
        }
        names.reverse();
        names.join("/")
    }

    pub fn find(&self, path: &str) -> Option<StepId> {
        let mut current = self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current = *self
                .children(current)
                .iter()
                .find(|c| self.step(**c).is_some_and(|s| s.name == part))?;
        }
        Some(current)
    }

    /// `id` followed by its descendants in depth-first pre-order.
    pub fn descendants(&self, id: StepId) -> Vec<StepId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev());
        }
        out
    }

    /// Pre-order walk from the root that skips disabled subtrees.
    pub fn enabled_preorder(&self) -> Vec<StepId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(current) = stack.pop() {
            match self.step(current) {
                Some(step) if !step.disabled => {
                    out.push(current);
                    stack.extend(step.children.iter().rev());
                }
                _ => {}
            }
        }
        out
    }

    pub fn clear_results(&mut self) {
        for step in self.slots.iter_mut().filter_map(|slot| slot.step.as_mut()) {
            step.result = StepResult::default();
        }
    }
}
