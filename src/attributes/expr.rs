//! Attribute expressions over blueprint variables.
//!
//! `"${name}"` is replaced by the variable's value; a string starting with `=`
//! is evaluated with evalexpr, with every scalar variable in scope.

use std::collections::BTreeMap;

use evalexpr::{ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, eval_with_context};
use serde_json::{Value, json};

use crate::error::ValidationError;

pub fn is_expression(value: &Value) -> bool {
    match value {
        Value::String(s) => variable_ref(s).is_some() || s.starts_with('='),
        Value::Array(items) => items.iter().any(is_expression),
        _ => false,
    }
}

fn variable_ref(s: &str) -> Option<&str> {
    s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}'))
}

/// Resolve any expressions in `value`. Non-expression values are returned as-is.
pub fn resolve(attr: &str, value: &Value, variables: &BTreeMap<String, Value>) -> Result<Value, ValidationError> {
    match value {
        Value::String(s) => {
            if let Some(name) = variable_ref(s) {
                return variables.get(name).cloned().ok_or_else(|| ValidationError::Expression {
                    attr: attr.to_string(),
                    reason: format!("unknown variable '{}'", name),
                });
            }
            if let Some(rhs) = s.strip_prefix('=') {
                return evaluate(attr, rhs, variables);
            }
            Ok(value.clone())
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(attr, item, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Ok(value.clone()),
    }
}

fn evaluate(attr: &str, rhs: &str, variables: &BTreeMap<String, Value>) -> Result<Value, ValidationError> {
    let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in variables {
        let ev = match v {
            Value::String(s) => Some(evalexpr::Value::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(evalexpr::Value::Int(i))
                } else {
                    n.as_f64().map(evalexpr::Value::Float)
                }
            }
            Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
            _ => None,
        };
        if let Some(ev) = ev {
            let _ = eval_ctx.set_value(k.clone(), ev);
        }
    }

    let result = eval_with_context(rhs.trim(), &eval_ctx).map_err(|e| ValidationError::Expression {
        attr: attr.to_string(),
        reason: e.to_string(),
    })?;

    match result {
        evalexpr::Value::String(s) => Ok(Value::String(s)),
        evalexpr::Value::Int(i) => Ok(json!(i)),
        evalexpr::Value::Float(f) => Ok(json!(f)),
        evalexpr::Value::Boolean(b) => Ok(Value::Bool(b)),
        evalexpr::Value::Empty => Ok(Value::Null),
        other => Err(ValidationError::Expression {
            attr: attr.to_string(),
            reason: format!("unsupported result {:?}", other),
        }),
    }
}
