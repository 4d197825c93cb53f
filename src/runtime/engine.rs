use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::ActionContext;
use crate::attributes::{AttributeSet, NodeLookup};
use crate::blueprint::document::DOCUMENT_VERSION;
use crate::blueprint::{Blueprint, StepId, StepKind, StepResult, StepStatus, ValidationIssue, resolve_attributes};
use crate::error::{BuildError, SceneError, Severity};
use crate::registry::ActionRegistry;
use crate::runtime::events::{BuildObserver, Progress};
use crate::runtime::scene::Scene;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunState {
    #[default]
    Idle,
    Validating,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum BuildMode {
    /// Validate, then run every leaf.
    #[default]
    Build,
    /// Validate every leaf against the scene without running it.
    Validate,
}

/// Cooperative cancellation flag, polled between leaves.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub run_id: Uuid,
    pub mode: BuildMode,
    pub outcome: RunState,
    /// Action invocations attempted; each batch variant counts once.
    pub leaves_run: usize,
    pub errors: usize,
    pub warnings: usize,
    pub validation_issues: Vec<ValidationIssue>,
    pub elapsed: Duration,
}

impl BuildSummary {
    pub fn is_success(&self) -> bool {
        self.outcome == RunState::Completed
    }

    /// "no errors", "2 warnings" or "1 error".
    pub fn error_summary(&self) -> String {
        fn plural(n: usize, word: &str) -> String {
            format!("{} {}{}", n, word, if n == 1 { "" } else { "s" })
        }
        if self.errors > 0 {
            plural(self.errors, "error")
        } else if self.warnings > 0 {
            plural(self.warnings, "warning")
        } else {
            "no errors".to_string()
        }
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.mode {
            BuildMode::Build => "Build",
            BuildMode::Validate => "Validation",
        };
        write!(
            f,
            "{} {} ({}) in {:.3}s",
            verb,
            self.outcome,
            self.error_summary(),
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug, Default)]
struct Tally {
    leaves_run: usize,
    /// Invocations the walk would make if nothing is abandoned.
    total: usize,
    errors: usize,
    warnings: usize,
}

impl Tally {
    fn progress(&self) -> Progress {
        Progress {
            index: self.leaves_run,
            total: self.total.max(self.leaves_run + 1),
        }
    }

    fn record(&mut self, result: &StepResult) {
        self.leaves_run += 1;
        match result.status {
            StepStatus::Error => self.errors += 1,
            StepStatus::Warning => self.warnings += 1,
            _ => {}
        }
    }
}

/// A group being walked and the index of its next child.
struct Frame {
    group: StepId,
    next: usize,
}

enum LeafOutcome {
    Finished(StepStatus),
    Cancelled,
}

/// Runs blueprints against a scene, one leaf at a time.
pub struct Engine {
    registry: Arc<ActionRegistry>,
    observers: Vec<Arc<dyn BuildObserver>>,
    cancel: CancelToken,
    mode: BuildMode,
    stop_on_validation_warnings: bool,
    state: RunState,
}

impl Engine {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            observers: Vec::new(),
            cancel: CancelToken::new(),
            mode: BuildMode::Build,
            stop_on_validation_warnings: false,
            state: RunState::Idle,
        }
    }

    pub fn with_mode(mut self, mode: BuildMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn stop_on_validation_warnings(mut self, stop: bool) -> Self {
        self.stop_on_validation_warnings = stop;
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn BuildObserver>) {
        self.observers.push(observer);
    }

    /// Handle for cancelling from outside the run. A token left cancelled
    /// aborts the next run before its first leaf.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Validate, then walk the tree in pre-order. Step results are written
    /// back onto `blueprint`; leaf failures never escape as errors.
    pub async fn run(&mut self, blueprint: &mut Blueprint, scene: &mut Scene) -> BuildSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        blueprint.tree.clear_results();

        info!(run_id = %run_id, mode = ?self.mode, scene = %scene.name, "Starting build");
        if blueprint.settings.debug_build() {
            debug!(run_id = %run_id, settings = ?blueprint.settings.as_map(), "Debug build");
        }

        self.state = RunState::Validating;
        let rebound = blueprint.resolve_actions(&self.registry);
        if rebound > 0 {
            debug!(run_id = %run_id, steps = rebound, "Resolved placeholder steps");
        }
        let mut issues = blueprint.pre_build_issues();
        issues.extend(blueprint.validate());
        for issue in &issues {
            match issue.severity {
                Severity::Warning => warn!(step = %issue.path, variant = ?issue.variant, "{}", issue.error),
                Severity::Error => error!(step = %issue.path, variant = ?issue.variant, "{}", issue.error),
            }
        }

        let blocked = issues
            .iter()
            .any(|i| i.is_error() || self.stop_on_validation_warnings);
        let mut tally = Tally::default();
        if blocked {
            attach_issues(blueprint, &issues);
            warn!(run_id = %run_id, issues = issues.len(), "Validation failed, not running");
            self.state = RunState::Failed;
            tally.errors = issues.iter().filter(|i| i.is_error()).count();
            tally.warnings = issues.len() - tally.errors;
        } else {
            self.state = RunState::Running;
            tally.total = leaf_total(blueprint);
            let rig = match self.mode {
                BuildMode::Build => Some(create_rig(blueprint, scene)),
                BuildMode::Validate => None,
            };
            let aborted = self.walk(blueprint, scene, rig.as_deref(), &mut tally).await;
            self.state = if aborted {
                RunState::Aborted
            } else if tally.errors > 0 {
                RunState::Failed
            } else {
                RunState::Completed
            };
        }

        let summary = BuildSummary {
            run_id,
            mode: self.mode,
            outcome: self.state,
            leaves_run: tally.leaves_run,
            errors: tally.errors,
            warnings: tally.warnings,
            validation_issues: issues,
            elapsed: started.elapsed(),
        };
        info!(run_id = %run_id, "{}", summary);
        for observer in &self.observers {
            observer.on_run_complete(&summary);
        }
        summary
    }

    /// Returns true when the walk was cancelled.
    async fn walk(&self, blueprint: &mut Blueprint, scene: &mut Scene, rig: Option<&str>, tally: &mut Tally) -> bool {
        let root = blueprint.tree.root();
        set_status(blueprint, root, StepStatus::Running);
        let mut frames = vec![Frame { group: root, next: 0 }];

        while let Some(frame) = frames.last_mut() {
            let group = frame.group;
            let Some(child) = blueprint.tree.children(group).get(frame.next).copied() else {
                frames.pop();
                let status = {
                    let children = blueprint.tree.children(group);
                    StepResult::roll_up(
                        children
                            .iter()
                            .filter_map(|c| blueprint.tree.step(*c))
                            .map(|s| &s.result.status),
                    )
                };
                set_status(blueprint, group, status);
                continue;
            };
            frame.next += 1;

            let Some(step) = blueprint.tree.step(child) else { continue };
            if step.disabled {
                debug!(step = %blueprint.tree.path(child), "Skipping disabled step");
                continue;
            }
            if step.is_group() {
                set_status(blueprint, child, StepStatus::Running);
                frames.push(Frame { group: child, next: 0 });
                continue;
            }

            if self.cancel.is_cancelled() {
                return self.abort(blueprint, &frames);
            }
            let status = match self.run_leaf(blueprint, child, scene, rig, tally).await {
                LeafOutcome::Finished(status) => status,
                LeafOutcome::Cancelled => return self.abort(blueprint, &frames),
            };

            if status == StepStatus::Error && self.is_non_recoverable(blueprint, child) {
                let path = blueprint.tree.path(child);
                warn!(step = %path, "Non-recoverable failure, skipping the rest of its group");
                if let Some(frame) = frames.last_mut() {
                    frame.next = usize::MAX;
                }
            }
        }
        false
    }

    fn abort(&self, blueprint: &mut Blueprint, frames: &[Frame]) -> bool {
        warn!("Build cancelled");
        for frame in frames {
            set_status(blueprint, frame.group, StepStatus::NotRun);
        }
        true
    }

    fn is_non_recoverable(&self, blueprint: &Blueprint, id: StepId) -> bool {
        blueprint
            .tree
            .step(id)
            .and_then(|s| s.action_id())
            .and_then(|action_id| self.registry.spec(action_id))
            .is_some_and(|spec| spec.non_recoverable)
    }

    async fn run_leaf(
        &self,
        blueprint: &mut Blueprint,
        id: StepId,
        scene: &mut Scene,
        rig: Option<&str>,
        tally: &mut Tally,
    ) -> LeafOutcome {
        let path = blueprint.tree.path(id);
        let Some(step) = blueprint.tree.step(id) else {
            return LeafOutcome::Finished(StepStatus::NotRun);
        };

        match &step.kind {
            StepKind::Group => LeafOutcome::Finished(StepStatus::NotRun),
            StepKind::Action(binding) => {
                let action_id = binding.action_id.clone();
                let attrs = binding.attrs.clone();
                set_status(blueprint, id, StepStatus::Running);
                self.notify_begin(&path, None, tally.progress());

                let result = self.execute(blueprint, &action_id, &attrs, scene, rig, &path, None).await;
                tally.record(&result);
                self.notify_end(&path, None, &result);
                let status = result.status;
                if let Ok(step) = blueprint.tree.get_mut(id) {
                    step.result = result;
                }
                LeafOutcome::Finished(status)
            }
            StepKind::Batch(batch) => {
                let action_id = batch.base.action_id.clone();
                let count = batch.variants.len();
                set_status(blueprint, id, StepStatus::Running);

                let mut variants: Vec<StepResult> = Vec::with_capacity(count);
                for index in 0..count {
                    if self.cancel.is_cancelled() {
                        set_status(blueprint, id, StepStatus::NotRun);
                        return LeafOutcome::Cancelled;
                    }
                    let Some(attrs) = variant_set(blueprint, id, index) else { break };
                    self.notify_begin(&path, Some(index), tally.progress());
                    let result = self
                        .execute(blueprint, &action_id, &attrs, scene, rig, &path, Some(index))
                        .await;
                    tally.record(&result);
                    self.notify_end(&path, Some(index), &result);
                    variants.push(result);
                }

                let status = StepResult::roll_up(variants.iter().map(|v| &v.status));
                if let Ok(step) = blueprint.tree.get_mut(id) {
                    step.result = StepResult {
                        status,
                        messages: Vec::new(),
                        variants,
                    };
                }
                LeafOutcome::Finished(status)
            }
        }
    }

    /// One action invocation: resolve, bind, validate, run.
    async fn execute(
        &self,
        blueprint: &Blueprint,
        action_id: &str,
        attrs: &AttributeSet,
        scene: &mut Scene,
        rig: Option<&str>,
        path: &str,
        variant: Option<usize>,
    ) -> StepResult {
        let started = Instant::now();
        let entry = match self.registry.get(action_id) {
            Ok(entry) => entry,
            Err(e) => {
                error!(step = %path, action = %action_id, "{}", e);
                return StepResult::error(e.to_string());
            }
        };

        let lookup: &dyn NodeLookup = &*scene;
        let values = match resolve_attributes(&entry.spec, attrs, &blueprint.variables, Some(lookup)) {
            Ok(values) => values,
            Err(errors) => {
                for e in &errors {
                    error!(step = %path, action = %action_id, variant = ?variant, "{}", e);
                }
                return StepResult {
                    status: StepStatus::Error,
                    messages: errors.iter().map(ToString::to_string).collect(),
                    variants: Vec::new(),
                };
            }
        };

        let mut action = match entry.create(&values) {
            Ok(action) => action,
            Err(e) => return StepResult::error(classify(e, path, action_id)),
        };

        let mut ctx = ActionContext::new(
            values,
            scene,
            &blueprint.settings,
            &blueprint.variables,
            path.to_string(),
            variant,
            rig.map(str::to_string),
        );

        let validated = std::panic::catch_unwind(AssertUnwindSafe(|| action.validate(&ctx)));
        let outcome = match validated {
            Ok(Ok(())) if self.mode == BuildMode::Validate => Ok(()),
            Ok(Ok(())) => match AssertUnwindSafe(action.run(&mut ctx)).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(classify(e, path, action_id)),
                Err(panic) => Err(panicked(panic, path, action_id)),
            },
            Ok(Err(e)) => Err(classify(e, path, action_id)),
            Err(panic) => Err(panicked(panic, path, action_id)),
        };

        let mut messages = ctx.take_warnings();
        for message in &messages {
            warn!(step = %path, action = %action_id, variant = ?variant, "{}", message);
        }
        let status = match outcome {
            Ok(()) if messages.is_empty() => StepStatus::Success,
            Ok(()) => StepStatus::Warning,
            Err(message) => {
                messages.push(message);
                StepStatus::Error
            }
        };
        info!(step = %path, action = %action_id, variant = ?variant, status = ?status, "Step finished in {:?}", started.elapsed());

        StepResult {
            status,
            messages,
            variants: Vec::new(),
        }
    }

    fn notify_begin(&self, path: &str, variant: Option<usize>, progress: Progress) {
        debug!(step = %path, variant = ?variant, "[{}/{}]", progress.index + 1, progress.total);
        for observer in &self.observers {
            observer.on_step_begin(path, variant, progress);
        }
    }

    fn notify_end(&self, path: &str, variant: Option<usize>, result: &StepResult) {
        for observer in &self.observers {
            observer.on_step_end(path, variant, result);
        }
    }
}

fn set_status(blueprint: &mut Blueprint, id: StepId, status: StepStatus) {
    if let Ok(step) = blueprint.tree.get_mut(id) {
        step.result.status = status;
    }
}

/// Create the rig node, or take over one left by an earlier build, and stamp
/// it with the build metadata. Returns the node name.
fn create_rig(blueprint: &Blueprint, scene: &mut Scene) -> String {
    let name = blueprint.settings.rig_node_name();
    if scene.contains(&name) {
        warn!(rig = %name, "Rig node already exists, building into it");
    } else if let Err(e) = scene.create_node(&name, None) {
        error!(rig = %name, "{}", e);
    }
    let file = blueprint
        .file
        .as_ref()
        .map_or(Value::Null, |path| Value::String(path.display().to_string()));
    let metadata = [
        ("version".to_string(), Value::from(DOCUMENT_VERSION)),
        ("rigName".to_string(), Value::String(blueprint.settings.rig_name().to_string())),
        ("blueprintFile".to_string(), file),
    ];
    if let Err(e) = scene.update_metadata(&name, metadata) {
        error!(rig = %name, "{}", e);
    }
    info!(rig = %name, "Created rig structure");
    name
}

/// Invocations a full walk makes: one per enabled action, one per variant
/// of an enabled batch.
fn leaf_total(blueprint: &Blueprint) -> usize {
    blueprint
        .tree
        .enabled_preorder()
        .into_iter()
        .filter_map(|id| blueprint.tree.step(id))
        .map(|step| match &step.kind {
            StepKind::Group => 0,
            StepKind::Action(_) => 1,
            StepKind::Batch(batch) => batch.variants.len(),
        })
        .sum()
}

fn variant_set(blueprint: &Blueprint, id: StepId, index: usize) -> Option<AttributeSet> {
    match &blueprint.tree.step(id)?.kind {
        StepKind::Batch(batch) => batch.variant_set(index),
        _ => None,
    }
}

/// Put blocking validation issues on their steps so the tree explains why
/// nothing ran.
fn attach_issues(blueprint: &mut Blueprint, issues: &[ValidationIssue]) {
    for issue in issues {
        if let Ok(step) = blueprint.tree.get_mut(issue.step) {
            let status = match issue.severity {
                Severity::Error => StepStatus::Error,
                Severity::Warning => StepStatus::Warning,
            };
            if step.result.status != StepStatus::Error {
                step.result.status = status;
            }
            let message = match issue.variant {
                Some(i) => format!("variant {}: {}", i, issue.error),
                None => issue.error.to_string(),
            };
            step.result.messages.push(message);
        }
    }
}

/// Message for a failed action. Modeled failures are logged plainly,
/// anything else with its full chain.
fn classify(e: anyhow::Error, path: &str, action_id: &str) -> String {
    if let Some(build) = e.downcast_ref::<BuildError>() {
        error!(step = %path, action = %action_id, "{}", build);
        return build.to_string();
    }
    if let Some(scene) = e.downcast_ref::<SceneError>() {
        error!(step = %path, action = %action_id, "{}", scene);
        return scene.to_string();
    }
    error!(step = %path, action = %action_id, "Unexpected error: {:?}", e);
    format!("unexpected error: {:#}", e)
}

fn panicked(panic: Box<dyn Any + Send>, path: &str, action_id: &str) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(step = %path, action = %action_id, "Action panicked: {}", message);
    format!("unexpected error: action panicked: {}", message)
}
