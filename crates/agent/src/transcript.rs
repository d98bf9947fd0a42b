//! Transcript export: a run's history as flat JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stepwise_core::error::{Error, Result};
use stepwise_core::run::{IterationLogEntry, RunOutcome, RunState, RunStatus};

/// A self-contained record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
    #[serde(default)]
    pub limit_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub iterations: Vec<IterationLogEntry>,
}

impl Transcript {
    pub fn from_state(run_id: &str, state: &RunState) -> Self {
        let (final_message, limit_reached, failure_reason) = match &state.outcome {
            Some(RunOutcome::Completed {
                message,
                limit_reached,
            }) => (Some(message.clone()), *limit_reached, None),
            Some(RunOutcome::Failed { reason }) => (None, false, Some(reason.clone())),
            Some(RunOutcome::Cancelled) | None => (None, false, None),
        };

        Self {
            run_id: run_id.to_string(),
            status: state.status,
            final_message,
            limit_reached,
            failure_reason,
            iterations: state.history.clone(),
        }
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| {
            Error::Internal(format!("failed to write transcript to {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_core::run::ToolCall;

    #[test]
    fn completed_run_exports_flat_json() {
        let mut first = IterationLogEntry::new(1);
        let mut call = ToolCall::pending("call_1_1", "calculator", json!({"expr": "2+2"}));
        call.mark_running();
        call.mark_success(json!(4));
        first.tool_calls.push(call);

        let mut second = IterationLogEntry::new(2);
        second.final_message = Some("Hi! 2+2 is 4.".into());

        let state = RunState {
            status: RunStatus::Completed,
            history: vec![first, second],
            current_iteration: None,
            outcome: Some(RunOutcome::Completed {
                message: "Hi! 2+2 is 4.".into(),
                limit_reached: false,
            }),
        };

        let transcript = Transcript::from_state("run-1", &state);
        let value: serde_json::Value = serde_json::from_str(&transcript.to_json().unwrap()).unwrap();

        assert_eq!(value["runId"], "run-1");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["finalMessage"], "Hi! 2+2 is 4.");
        assert_eq!(value["iterations"][0]["toolCalls"][0]["toolName"], "calculator");
        assert_eq!(value["iterations"][0]["toolCalls"][0]["result"], 4);
        assert!(value["iterations"][0]["toolCalls"][0]["finishedAt"].is_string());
        assert_eq!(value["iterations"][1]["finalMessage"], "Hi! 2+2 is 4.");
    }

    #[test]
    fn failed_run_keeps_reason_and_history() {
        let state = RunState {
            status: RunStatus::Failed,
            history: vec![IterationLogEntry::new(1)],
            current_iteration: None,
            outcome: Some(RunOutcome::Failed {
                reason: "Model unavailable: timeout".into(),
            }),
        };
        let transcript = Transcript::from_state("run-2", &state);
        assert_eq!(transcript.iterations.len(), 1);
        assert!(transcript.final_message.is_none());
        assert_eq!(
            transcript.failure_reason.as_deref(),
            Some("Model unavailable: timeout")
        );
    }
}
