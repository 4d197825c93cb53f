//! Typed attribute schema, value checks and the value map handed to actions.

pub mod expr;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistrationError, ValidationError};

/// Attribute values explicitly set on a step, keyed by attribute name.
pub type AttributeSet = BTreeMap<String, Value>;

/// Something that can answer whether a node reference resolves.
pub trait NodeLookup {
    fn contains_node(&self, name: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AttrType {
    Bool,
    Int,
    Float,
    String,
    StringList,
    /// Fixed-arity numeric tuple.
    Vector(usize),
    /// Index into the definition's option labels.
    Option,
    Node,
    NodeList,
    File,
    /// A tag no attribute kind exists for. Rejected at registration.
    Unknown(String),
}

impl From<String> for AttrType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "bool" => AttrType::Bool,
            "int" => AttrType::Int,
            "float" => AttrType::Float,
            "string" => AttrType::String,
            "stringlist" => AttrType::StringList,
            "vector2" => AttrType::Vector(2),
            "vector3" => AttrType::Vector(3),
            "vector4" => AttrType::Vector(4),
            "option" => AttrType::Option,
            "node" => AttrType::Node,
            "nodelist" => AttrType::NodeList,
            "file" => AttrType::File,
            _ => AttrType::Unknown(tag),
        }
    }
}

impl From<&str> for AttrType {
    fn from(tag: &str) -> Self {
        AttrType::from(tag.to_string())
    }
}

impl From<AttrType> for String {
    fn from(attr_type: AttrType) -> Self {
        attr_type.to_string()
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::Bool => write!(f, "bool"),
            AttrType::Int => write!(f, "int"),
            AttrType::Float => write!(f, "float"),
            AttrType::String => write!(f, "string"),
            AttrType::StringList => write!(f, "stringlist"),
            AttrType::Vector(n) => write!(f, "vector{}", n),
            AttrType::Option => write!(f, "option"),
            AttrType::Node => write!(f, "node"),
            AttrType::NodeList => write!(f, "nodelist"),
            AttrType::File => write!(f, "file"),
            AttrType::Unknown(tag) => write!(f, "{}", tag),
        }
    }
}

impl AttrType {
    /// Value used when a definition declares no default of its own.
    pub fn type_default(&self) -> Value {
        match self {
            AttrType::Bool => Value::Bool(false),
            AttrType::Int | AttrType::Option => Value::from(0),
            AttrType::Float => Value::from(0.0),
            AttrType::String | AttrType::File => Value::String(String::new()),
            AttrType::StringList | AttrType::NodeList => Value::Array(Vec::new()),
            AttrType::Vector(n) => Value::Array(vec![Value::from(0.0); *n]),
            AttrType::Node | AttrType::Unknown(_) => Value::Null,
        }
    }
}

/// Immutable schema entry for one attribute of an action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub attr_type: AttrType,
    #[serde(default, alias = "value", skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub advanced: bool,
    #[serde(default)]
    pub description: String,
}

impl AttributeDefinition {
    pub fn new(name: &str, attr_type: impl Into<AttrType>) -> Self {
        Self {
            name: name.to_string(),
            attr_type: attr_type.into(),
            default: None,
            min: None,
            max: None,
            options: Vec::new(),
            optional: false,
            advanced: false,
            description: String::new(),
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn options<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.options = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn advanced(mut self) -> Self {
        self.advanced = true;
        self
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.description = text.to_string();
        self
    }

    /// The declared default, or the type's default.
    pub fn default_or_type(&self) -> Value {
        self.default.clone().unwrap_or_else(|| self.attr_type.type_default())
    }

    /// Registration-time schema check.
    pub fn check_definition(&self, action: &str) -> Result<(), RegistrationError> {
        if let AttrType::Unknown(tag) = &self.attr_type {
            return Err(RegistrationError::UnknownAttributeType {
                action: action.to_string(),
                attr: self.name.clone(),
                tag: tag.clone(),
            });
        }
        if self.attr_type == AttrType::Option && self.options.is_empty() {
            return Err(RegistrationError::InvalidSpec(format!(
                "option attribute '{}.{}' declares no options",
                action, self.name
            )));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(RegistrationError::InvalidSpec(format!(
                    "'{}.{}' has min {} greater than max {}",
                    action, self.name, min, max
                )));
            }
        }
        if let Some(default) = &self.default {
            check_value(self, default).map_err(|e| {
                RegistrationError::InvalidSpec(format!("default of '{}.{}': {}", action, self.name, e))
            })?;
        }
        Ok(())
    }
}

/// Name of a JSON value's shape, for error messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn mismatch(def: &AttributeDefinition, value: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        attr: def.name.clone(),
        expected: def.attr_type.to_string(),
        found: kind_of(value).to_string(),
    }
}

fn check_bounds(def: &AttributeDefinition, number: f64) -> Result<(), ValidationError> {
    let below = def.min.is_some_and(|min| number < min);
    let above = def.max.is_some_and(|max| number > max);
    if below || above {
        let show = |bound: Option<f64>| bound.map(|b| b.to_string()).unwrap_or_else(|| "..".to_string());
        return Err(ValidationError::OutOfRange {
            attr: def.name.clone(),
            value: number,
            min: show(def.min),
            max: show(def.max),
        });
    }
    Ok(())
}

fn as_node_name(value: &Value) -> Option<Option<&str>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) if s.is_empty() => Some(None),
        Value::String(s) => Some(Some(s.as_str())),
        _ => None,
    }
}

/// Shape, bounds and option checks. Pure; no requiredness or node resolution.
pub fn check_value(def: &AttributeDefinition, value: &Value) -> Result<(), ValidationError> {
    match &def.attr_type {
        AttrType::Bool => value.as_bool().map(|_| ()).ok_or_else(|| mismatch(def, value)),
        AttrType::Int => {
            let n = value.as_i64().ok_or_else(|| mismatch(def, value))?;
            check_bounds(def, n as f64)
        }
        AttrType::Float => {
            let n = value.as_f64().ok_or_else(|| mismatch(def, value))?;
            check_bounds(def, n)
        }
        AttrType::String | AttrType::File => value.as_str().map(|_| ()).ok_or_else(|| mismatch(def, value)),
        AttrType::StringList => {
            let items = value.as_array().ok_or_else(|| mismatch(def, value))?;
            if items.iter().all(Value::is_string) {
                Ok(())
            } else {
                Err(mismatch(def, value))
            }
        }
        AttrType::Vector(arity) => {
            let items = value.as_array().ok_or_else(|| mismatch(def, value))?;
            if items.len() != *arity {
                return Err(ValidationError::ArityMismatch {
                    attr: def.name.clone(),
                    expected: *arity,
                    found: items.len(),
                });
            }
            for item in items {
                let n = item.as_f64().ok_or_else(|| mismatch(def, value))?;
                check_bounds(def, n)?;
            }
            Ok(())
        }
        AttrType::Option => {
            let index = value.as_i64().ok_or_else(|| mismatch(def, value))?;
            if index < 0 || index as usize >= def.options.len() {
                return Err(ValidationError::OptionOutOfRange {
                    attr: def.name.clone(),
                    index,
                    count: def.options.len(),
                });
            }
            Ok(())
        }
        AttrType::Node => as_node_name(value).map(|_| ()).ok_or_else(|| mismatch(def, value)),
        AttrType::NodeList => {
            let items = value.as_array().ok_or_else(|| mismatch(def, value))?;
            for item in items {
                match as_node_name(item) {
                    Some(Some(_)) => {}
                    _ => return Err(mismatch(def, value)),
                }
            }
            Ok(())
        }
        AttrType::Unknown(tag) => Err(ValidationError::UnknownType {
            attr: def.name.clone(),
            tag: tag.clone(),
        }),
    }
}

/// Full check of a resolved value. Node references are only resolved when a
/// lookup is supplied.
pub fn validate(def: &AttributeDefinition, value: &Value, nodes: Option<&dyn NodeLookup>) -> Result<(), ValidationError> {
    check_value(def, value)?;

    match &def.attr_type {
        AttrType::String if !def.optional => {
            if value.as_str().is_some_and(str::is_empty) {
                return Err(ValidationError::Required { attr: def.name.clone() });
            }
        }
        AttrType::Node => match as_node_name(value).flatten() {
            None if !def.optional => return Err(ValidationError::Required { attr: def.name.clone() }),
            None => {}
            Some(name) => resolve_node(def, name, nodes)?,
        },
        AttrType::NodeList => {
            for name in value.as_array().into_iter().flatten().filter_map(Value::as_str) {
                resolve_node(def, name, nodes)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn resolve_node(def: &AttributeDefinition, name: &str, nodes: Option<&dyn NodeLookup>) -> Result<(), ValidationError> {
    match nodes {
        Some(lookup) if !lookup.contains_node(name) => Err(ValidationError::UnresolvedNode {
            attr: def.name.clone(),
            node: name.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Resolved attribute values for one action invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeValues {
    values: BTreeMap<String, Value>,
}

impl AttributeValues {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| anyhow!("missing attribute '{}'", name))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| anyhow!("attribute '{}' is not a bool", name))
    }

    pub fn get_int(&self, name: &str) -> Result<i64> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| anyhow!("attribute '{}' is not an int", name))
    }

    pub fn get_float(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| anyhow!("attribute '{}' is not a float", name))
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| anyhow!("attribute '{}' is not a string", name))
    }

    pub fn get_option(&self, name: &str) -> Result<usize> {
        Ok(self.get_int(name)? as usize)
    }

    pub fn get_vector(&self, name: &str) -> Result<Vec<f64>> {
        self.require(name)?
            .as_array()
            .and_then(|items| items.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
            .ok_or_else(|| anyhow!("attribute '{}' is not a vector", name))
    }

    pub fn get_string_list(&self, name: &str) -> Result<Vec<String>> {
        self.require(name)?
            .as_array()
            .and_then(|items| {
                items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .ok_or_else(|| anyhow!("attribute '{}' is not a string list", name))
    }

    /// A node reference; `None` when unset.
    pub fn get_node(&self, name: &str) -> Result<Option<String>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(anyhow!("attribute '{}' is not a node reference", name)),
        }
    }

    pub fn get_nodes(&self, name: &str) -> Result<Vec<String>> {
        self.get_string_list(name)
    }
}
