//! Scripted gateway — replays a fixed sequence of model answers.
//!
//! Used for demos (`stepwise run --script`) and for deterministic tests of
//! the run engine. A script is a JSON array whose items are one of:
//!
//! ```json
//! [
//!   {"tool_calls": [{"name": "calculator", "arguments": {"expr": "2+2"}}]},
//!   {"raw": "free text the model might produce"},
//!   {"unavailable": "simulated outage"},
//!   {"final_message": "Hi! 2+2 is 4."}
//! ]
//! ```

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use stepwise_core::error::{Error, ModelError};
use stepwise_core::gateway::{ModelGateway, StructuredResponse, parse_structured};
use stepwise_core::message::Conversation;
use tracing::debug;

/// Keys a script step may carry; a step with none of them is a typo.
const STEP_KEYS: &[&str] = &[
    "raw",
    "unavailable",
    "thoughts",
    "plan",
    "tool_calls",
    "toolCalls",
    "final_message",
    "finalMessage",
];

/// One scripted model answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// Raw model text, run through the structured-response parser.
    Raw { raw: String },
    /// The model service fails for this call.
    Unavailable { unavailable: String },
    /// A ready-made structured response.
    Respond(StructuredResponse),
}

impl From<StructuredResponse> for ScriptStep {
    fn from(response: StructuredResponse) -> Self {
        Self::Respond(response)
    }
}

/// A [`ModelGateway`] that answers from a script.
///
/// Once the script runs out, further calls fail as unavailable unless
/// [`repeat_last`](Self::repeat_last) was set.
#[derive(Debug)]
pub struct ScriptedGateway {
    steps: Vec<ScriptStep>,
    repeat_last: bool,
    delay: Option<Duration>,
    calls: Mutex<usize>,
    conversations: Mutex<Vec<Conversation>>,
}

impl ScriptedGateway {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            repeat_last: false,
            delay: None,
            calls: Mutex::new(0),
            conversations: Mutex::new(Vec::new()),
        }
    }

    /// Convenience constructor from structured responses.
    pub fn from_responses(responses: Vec<StructuredResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::from).collect())
    }

    /// Load a script from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read script {}: {e}", path.display()),
        })?;
        let raw_steps: Vec<serde_json::Value> = serde_json::from_str(&content)?;
        let mut steps = Vec::with_capacity(raw_steps.len());
        for (i, value) in raw_steps.into_iter().enumerate() {
            let known = value
                .as_object()
                .is_some_and(|step| STEP_KEYS.iter().any(|key| step.contains_key(*key)));
            if !known {
                return Err(Error::Config {
                    message: format!(
                        "step {} of script {} has none of: {}",
                        i + 1,
                        path.display(),
                        STEP_KEYS.join(", ")
                    ),
                });
            }
            steps.push(serde_json::from_value::<ScriptStep>(value)?);
        }
        if steps.is_empty() {
            return Err(Error::Config {
                message: format!("script {} has no steps", path.display()),
            });
        }
        Ok(Self::new(steps))
    }

    /// Keep answering with the last step after the script is exhausted.
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `complete` has been called.
    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }

    /// Snapshots of every conversation the gateway was asked about.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    fn next_step(&self, conversation: &Conversation) -> Option<ScriptStep> {
        let index = {
            let mut calls = self.calls.lock().ok()?;
            let index = *calls;
            *calls += 1;
            index
        };
        if let Ok(mut seen) = self.conversations.lock() {
            seen.push(conversation.clone());
        }

        match self.steps.get(index) {
            Some(step) => Some(step.clone()),
            None if self.repeat_last => self.steps.last().cloned(),
            None => None,
        }
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
    ) -> Result<StructuredResponse, ModelError> {
        let step = self.next_step(conversation);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        debug!(call = self.calls(), "Scripted gateway answering");

        match step {
            Some(ScriptStep::Respond(response)) => Ok(response),
            Some(ScriptStep::Raw { raw }) => parse_structured(&raw),
            Some(ScriptStep::Unavailable { unavailable }) => {
                Err(ModelError::Unavailable(unavailable))
            }
            None => Err(ModelError::Unavailable("script exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use stepwise_core::gateway::ToolRequest;

    #[tokio::test]
    async fn replays_in_order_then_runs_out() {
        let gateway = ScriptedGateway::from_responses(vec![
            StructuredResponse::tools(vec![ToolRequest::new(
                "calculator",
                json!({"expr": "2+2"}),
            )]),
            StructuredResponse::final_only("done"),
        ]);
        let conv = Conversation::seeded("", "task");

        assert!(gateway.complete(&conv).await.unwrap().has_tool_calls());
        assert_eq!(
            gateway.complete(&conv).await.unwrap().final_text(),
            Some("done")
        );
        let err = gateway.complete(&conv).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn repeat_last_never_runs_out() {
        let gateway =
            ScriptedGateway::from_responses(vec![StructuredResponse::final_only("again")])
                .repeat_last();
        let conv = Conversation::seeded("", "task");
        for _ in 0..3 {
            assert_eq!(
                gateway.complete(&conv).await.unwrap().final_text(),
                Some("again")
            );
        }
    }

    #[tokio::test]
    async fn raw_steps_go_through_the_parser() {
        let gateway = ScriptedGateway::new(vec![ScriptStep::Raw {
            raw: "just prose".into(),
        }]);
        let err = gateway
            .complete(&Conversation::seeded("", "task"))
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Response { .. }));
    }

    #[test]
    fn loads_script_file_with_mixed_steps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"toolCalls": [{{"tool": "calculator", "args": {{"expr": "2+2"}}}}]}},
                {{"raw": "hello"}},
                {{"unavailable": "down"}},
                {{"finalMessage": "Hi! 4."}}
            ]"#
        )
        .unwrap();

        let gateway = ScriptedGateway::from_file(file.path()).unwrap();
        assert_eq!(gateway.steps.len(), 4);
        assert!(matches!(&gateway.steps[0], ScriptStep::Respond(r) if r.tool_calls[0].name == "calculator"));
        assert!(matches!(gateway.steps[1], ScriptStep::Raw { .. }));
        assert!(matches!(gateway.steps[2], ScriptStep::Unavailable { .. }));
        assert!(matches!(&gateway.steps[3], ScriptStep::Respond(r) if r.final_text() == Some("Hi! 4.")));
    }

    #[test]
    fn misspelled_step_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"finalMessage": "ok"}}, {{"finalmsg": "x"}}]"#).unwrap();

        let err = ScriptedGateway::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("step 2"), "{err}");
    }

    #[test]
    fn non_object_step_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["just a string"]"#).unwrap();
        assert!(ScriptedGateway::from_file(file.path()).is_err());
    }

    #[test]
    fn empty_script_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        assert!(ScriptedGateway::from_file(file.path()).is_err());
    }
}
