//! Error taxonomy for discovery, validation, tree editing and execution.

use std::fmt;

use thiserror::Error;

/// A source could not register its actions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistrationError {
    #[error("action id '{id}' from '{source_name}' is already registered by '{existing}'")]
    DuplicateIdentifier {
        id: String,
        existing: String,
        source_name: String,
    },

    #[error("attribute '{attr}' of action '{action}' has unknown type '{tag}'")]
    UnknownAttributeType {
        action: String,
        attr: String,
        tag: String,
    },

    #[error("action '{action}' declares attribute '{attr}' more than once")]
    DuplicateAttribute { action: String, attr: String },

    #[error("action spec is invalid: {0}")]
    InvalidSpec(String),
}

/// A module inside a source failed to load. Discovery continues past it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to load module '{module}' from '{source_name}': {reason}")]
pub struct DiscoveryLoadError {
    pub source_name: String,
    pub module: String,
    pub reason: String,
}

/// An attribute value violates its definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("'{attr}' expects {expected}, got {found}")]
    TypeMismatch {
        attr: String,
        expected: String,
        found: String,
    },

    #[error("'{attr}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        attr: String,
        value: f64,
        min: String,
        max: String,
    },

    #[error("'{attr}' option index {index} is outside 0..{count}")]
    OptionOutOfRange { attr: String, index: i64, count: usize },

    #[error("'{attr}' expects {expected} components, got {found}")]
    ArityMismatch {
        attr: String,
        expected: usize,
        found: usize,
    },

    #[error("'{attr}' is not set")]
    Required { attr: String },

    #[error("'{attr}' references missing node '{node}'")]
    UnresolvedNode { attr: String, node: String },

    #[error("'{attr}' is not an attribute of this action")]
    UnknownAttribute { attr: String },

    #[error("'{attr}' has unknown type '{tag}'")]
    UnknownType { attr: String, tag: String },

    #[error("'{attr}' expression failed: {reason}")]
    Expression { attr: String, reason: String },
}

/// A step references an action id that has no registered spec.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("action '{action_id}' is not registered")]
pub struct UnresolvedActionError {
    pub action_id: String,
}

/// An edit would break the tree's shape.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StructureError {
    #[error("step {0} does not exist")]
    StepNotFound(String),

    #[error("step '{0}' is not a group and cannot have children")]
    NotAGroup(String),

    #[error("step '{0}' is not an action")]
    NotAnAction(String),

    #[error("step '{0}' is not a batch action")]
    NotABatch(String),

    #[error("index {index} is out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("variant {index} is out of bounds for {len} variants")]
    VariantOutOfBounds { index: usize, len: usize },

    #[error("cannot move '{step}' beneath its own descendant '{target}'")]
    Cycle { step: String, target: String },

    #[error("the root step cannot be removed or moved")]
    RootImmutable,
}

/// A controlled failure reported by an action's own logic.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{0}")]
pub struct BuildError(pub String);

impl BuildError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Scene primitives used by actions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SceneError {
    #[error("node '{0}' already exists")]
    NodeExists(String),

    #[error("node '{0}' does not exist")]
    NodeNotFound(String),

    #[error("cannot parent '{child}' under '{parent}': it would create a cycle")]
    ParentCycle { child: String, parent: String },

    #[error("no rig node is being built")]
    NoRig,
}

/// Anything the static validator can attach to a step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UnresolvedAction(#[from] UnresolvedActionError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("{0}")]
    Other(String),
}

/// Errors from editing a blueprint through its tree API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EditError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    UnresolvedAction(#[from] UnresolvedActionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}
