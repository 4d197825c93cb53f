use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::blueprint::{StepResult, StepStatus};
use crate::runtime::engine::{BuildSummary, RunState};

/// Position of an action invocation within a run.
///
/// `index` counts from zero. `total` is the count for a full walk, so a run
/// cut short by a non-recoverable failure never reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

/// Receives progress notifications. Advisory only; nothing an observer does
/// changes the run.
pub trait BuildObserver: Send + Sync {
    fn on_step_begin(&self, _path: &str, _variant: Option<usize>, _progress: Progress) {}

    fn on_step_end(&self, _path: &str, _variant: Option<usize>, _result: &StepResult) {}

    fn on_run_complete(&self, _summary: &BuildSummary) {}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    StepBegin {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant: Option<usize>,
        index: usize,
        total: usize,
    },
    StepEnd {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        variant: Option<usize>,
        status: StepStatus,
        messages: Vec<String>,
    },
    RunComplete {
        run_id: Uuid,
        outcome: RunState,
        errors: usize,
        warnings: usize,
        elapsed_ms: u128,
    },
}

/// Forwards every notification as a [`BuildEvent`] on an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<BuildEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BuildEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BuildEvent) {
        if self.tx.send(event).is_err() {
            debug!("Build event receiver dropped");
        }
    }
}

impl BuildObserver for ChannelObserver {
    fn on_step_begin(&self, path: &str, variant: Option<usize>, progress: Progress) {
        self.send(BuildEvent::StepBegin {
            path: path.to_string(),
            variant,
            index: progress.index,
            total: progress.total,
        });
    }

    fn on_step_end(&self, path: &str, variant: Option<usize>, result: &StepResult) {
        self.send(BuildEvent::StepEnd {
            path: path.to_string(),
            variant,
            status: result.status,
            messages: result.messages.clone(),
        });
    }

    fn on_run_complete(&self, summary: &BuildSummary) {
        self.send(BuildEvent::RunComplete {
            run_id: summary.run_id,
            outcome: summary.outcome,
            errors: summary.errors,
            warnings: summary.warnings,
            elapsed_ms: summary.elapsed.as_millis(),
        });
    }
}
