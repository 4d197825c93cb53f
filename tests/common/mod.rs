#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use pulse::actions::builtin::CoreActions;
use pulse::actions::{ActionContext, ActionEntry, ActionSpec, BuildAction};
use pulse::attributes::{AttributeDefinition, AttributeValues};
use pulse::blueprint::{Blueprint, BlueprintBuilder, StepStatus};
use pulse::error::BuildError;
use pulse::registry::{ActionLoader, ActionRegistry};

pub const SCRIPTED: &str = "Test.Scripted";
pub const CRITICAL: &str = "Test.Critical";

pub const OK: i64 = 0;
pub const WARN: i64 = 1;
pub const FAIL: i64 = 2;
pub const PANIC: i64 = 3;
pub const UNEXPECTED: i64 = 4;

/// Labels of scripted actions in the order they ran.
pub type RunLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
struct Scripted {
    label: String,
    outcome: i64,
    log: RunLog,
}

#[async_trait]
impl BuildAction for Scripted {
    async fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<()> {
        self.log.lock().unwrap().push(self.label.clone());
        match self.outcome {
            WARN => {
                ctx.warn(format!("{} warned", self.label));
                Ok(())
            }
            FAIL => Err(BuildError::new(format!("{} failed", self.label)).into()),
            PANIC => panic!("{} panicked", self.label),
            UNEXPECTED => Err(anyhow!("{} hit a bug", self.label)),
            _ => Ok(()),
        }
    }
}

pub fn scripted_spec(id: &str) -> ActionSpec {
    ActionSpec::new(id, "Scripted")
        .category("Test")
        .attr(AttributeDefinition::new("label", "string").default_value("scripted"))
        .attr(AttributeDefinition::new("outcome", "option").options(["ok", "warn", "fail", "panic", "unexpected"]))
        .attr(AttributeDefinition::new("weight", "float").range(Some(0.0), Some(1.0)).optional())
}

pub fn scripted_entry(spec: ActionSpec, log: &RunLog) -> ActionEntry {
    let log = log.clone();
    ActionEntry::new(spec, move |attrs: &AttributeValues| {
        Ok(Box::new(Scripted {
            label: attrs.get_str("label")?.to_string(),
            outcome: attrs.get_int("outcome")?,
            log: log.clone(),
        }) as Box<dyn BuildAction>)
    })
}

/// Core actions plus the scripted test actions, and the log they write to.
pub fn test_registry() -> (Arc<ActionRegistry>, RunLog) {
    let registry = ActionRegistry::shared();
    let log: RunLog = Arc::new(Mutex::new(Vec::new()));
    let loader = ActionLoader::new(registry.clone());
    assert!(loader.add_package(&CoreActions).is_ok());
    registry
        .register_source(
            "test:scripted",
            vec![
                scripted_entry(scripted_spec(SCRIPTED), &log),
                scripted_entry(scripted_spec(CRITICAL).non_recoverable(), &log),
            ],
        )
        .expect("scripted registration");
    (registry, log)
}

/// A builder with `rigName` set to "test", so the rig node is `test_rig`.
pub fn rig_builder(registry: &ActionRegistry) -> BlueprintBuilder<'_> {
    BlueprintBuilder::new(registry).setting("rigName", "test")
}

pub fn ran(log: &RunLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn status(blueprint: &Blueprint, path: &str) -> StepStatus {
    let id = blueprint.tree.find(path).unwrap_or_else(|| panic!("no step at {}", path));
    blueprint.tree.step(id).unwrap().result.status
}
