//! Run-level events.
//!
//! `RunEvent` is the push-style companion of the [`RunHandle`](crate::RunHandle)
//! state streams: every change the engine makes is also broadcast as one
//! event, so a consumer (the CLI progress printer, a UI bridge) can react to
//! each step without diffing snapshots.

use serde::{Deserialize, Serialize};
use stepwise_core::run::{IterationLogEntry, RunOutcome, RunStatus};

/// Events emitted by the engine while a run progresses.
///
/// - `iteration_started`   — a model call for iteration `index` is about to be made
/// - `iteration_updated`   — the in-progress iteration changed (tool calls dispatched or settled)
/// - `iteration_completed` — the iteration was folded into history
/// - `status_changed`      — the run status changed
/// - `finished`            — the run reached a terminal status; always the last event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    IterationStarted { index: usize },

    IterationUpdated { entry: IterationLogEntry },

    IterationCompleted { entry: IterationLogEntry },

    StatusChanged { status: RunStatus },

    Finished { outcome: RunOutcome },
}

impl RunEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::IterationStarted { .. } => "iteration_started",
            Self::IterationUpdated { .. } => "iteration_updated",
            Self::IterationCompleted { .. } => "iteration_completed",
            Self::StatusChanged { .. } => "status_changed",
            Self::Finished { .. } => "finished",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}
