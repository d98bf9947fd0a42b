//! Run data model — what a run records about itself.
//!
//! These types are the observable state of a run: the per-call
//! [`ToolCall`] records, one [`IterationLogEntry`] per completed iteration,
//! and the [`RunState`] snapshot that ties them together. They serialize to
//! the flat camelCase JSON used for transcript export.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl ToolCallStatus {
    /// `true` once the call has settled, either way.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// One tool call as recorded in the run history.
///
/// Created `pending` when the model asks for it, moved to `running` on
/// dispatch, then settled in place. Never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    pub fn pending(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ToolCallStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_success(&mut self, result: serde_json::Value) {
        self.status = ToolCallStatus::Success;
        self.result = Some(result);
        self.error_message = None;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = ToolCallStatus::Error;
        self.result = None;
        self.error_message = Some(message.into());
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock time between start and finish, when both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// The record of one iteration.
///
/// An entry either requests tools or concludes the run: `final_message` is
/// only ever set when `tool_calls` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationLogEntry {
    /// 1-based iteration number.
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
}

impl IterationLogEntry {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// `true` once every tool call in the entry has settled.
    pub fn is_settled(&self) -> bool {
        self.tool_calls.iter().all(|c| c.status.is_terminal())
    }

    /// Number of tool calls that ended in error.
    pub fn failed_calls(&self) -> usize {
        self.tool_calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Error)
            .count()
    }
}

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The model concluded, or the iteration limit was reached
    /// (`limit_reached`, with a synthetic message).
    Completed {
        message: String,
        #[serde(default)]
        limit_reached: bool,
    },
    /// Cancellation was observed; not an error.
    Cancelled,
    /// The model became unavailable or the engine hit an internal error.
    Failed { reason: String },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed { .. } => RunStatus::Completed,
            Self::Cancelled => RunStatus::Cancelled,
            Self::Failed { .. } => RunStatus::Failed,
        }
    }

    /// The final message text, for completed runs.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Completed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Snapshot of a run as seen by observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub status: RunStatus,
    /// Completed iterations, append-only.
    pub history: Vec<IterationLogEntry>,
    /// The iteration in progress, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_iteration: Option<IterationLogEntry>,
    /// Set together with a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Running,
            history: Vec::new(),
            current_iteration: None,
            outcome: None,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
