//! ModelGateway trait — the single call contract to the language model.
//!
//! The engine only ever asks one question: "given this conversation, what
//! do you want to do next?" The answer is a [`StructuredResponse`] holding
//! optional reasoning, an optional list of tool calls, and/or a final
//! message. How a backend produces it (wire protocol, prompting tricks) is
//! the gateway's own business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::Conversation;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Call ID chosen by the model, if it supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the tool to invoke
    #[serde(alias = "tool", alias = "toolName")]
    pub name: String,

    /// Arguments as a JSON value
    #[serde(default, alias = "args")]
    pub arguments: serde_json::Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// The model's answer parsed into its parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,

    #[serde(default, alias = "toolCalls", skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolRequest>,

    #[serde(default, alias = "finalMessage", skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
}

impl StructuredResponse {
    /// A response that only concludes the task.
    pub fn final_only(message: impl Into<String>) -> Self {
        Self {
            final_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// A response that only requests tools.
    pub fn tools(calls: Vec<ToolRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::default()
        }
    }

    pub fn with_thoughts(mut self, thoughts: impl Into<String>) -> Self {
        self.thoughts = Some(thoughts.into());
        self
    }

    pub fn with_plan(mut self, plan: impl Into<String>) -> Self {
        self.plan = Some(plan.into());
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The final message, if present and not blank.
    pub fn final_text(&self) -> Option<&str> {
        self.final_message
            .as_deref()
            .filter(|m| !m.trim().is_empty())
    }
}

/// The language-model capability consumed by the engine.
///
/// One gateway is shared by every run of a session (and possibly by several
/// sessions), so implementations must tolerate concurrent `complete` calls.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "openai", "scripted").
    fn name(&self) -> &str;

    /// Prepare the capability with the session's system prompt.
    ///
    /// Called once by `AgentSession::create`. Default implementation does
    /// nothing; stateless backends receive the prompt in every conversation.
    async fn open(&self, _system_prompt: &str) -> Result<(), ModelError> {
        Ok(())
    }

    /// Produce the next structured response for `conversation`.
    async fn complete(&self, conversation: &Conversation)
    -> Result<StructuredResponse, ModelError>;

    /// Release whatever `open` acquired. Called by `AgentSession::destroy`.
    async fn release(&self) {}
}

// ── Parsing model text into a StructuredResponse ──────────────────────────

/// Lenient wire shape: accepts the field spellings models commonly emit.
#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default, alias = "thought", alias = "reasoning")]
    thoughts: Option<String>,
    #[serde(default)]
    plan: Option<PlanField>,
    #[serde(default, alias = "toolCalls", alias = "actions")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(
        default,
        alias = "finalMessage",
        alias = "final_answer",
        alias = "answer"
    )]
    final_message: Option<String>,
}

/// Plans arrive either as prose or as a list of steps.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanField {
    Text(String),
    Steps(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "tool", alias = "toolName", alias = "tool_name")]
    name: String,
    #[serde(default, alias = "args", alias = "input")]
    arguments: serde_json::Value,
}

/// Parse a model's raw text into a [`StructuredResponse`].
///
/// The text may be bare JSON, JSON inside a Markdown code fence, or JSON
/// surrounded by prose. Tool arguments given as a JSON-encoded string are
/// decoded. Returns [`ModelError::Response`] carrying the raw text when no
/// usable object is found; callers typically fall back to treating the raw
/// text as the final message.
pub fn parse_structured(raw: &str) -> Result<StructuredResponse, ModelError> {
    let candidate = extract_json_object(raw)
        .ok_or_else(|| ModelError::response(raw, "no JSON object found in model output"))?;

    let wire: WireResponse = serde_json::from_str(candidate)
        .map_err(|e| ModelError::response(raw, format!("invalid structured response: {e}")))?;

    if wire.thoughts.is_none()
        && wire.plan.is_none()
        && wire.tool_calls.is_none()
        && wire.final_message.is_none()
    {
        return Err(ModelError::response(
            raw,
            "JSON object has none of thoughts/plan/tool_calls/final_message",
        ));
    }

    let plan = wire.plan.map(|p| match p {
        PlanField::Text(text) => text,
        PlanField::Steps(steps) => steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n"),
    });

    let tool_calls = wire
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolRequest {
            id: tc.id,
            name: tc.name,
            arguments: decode_arguments(tc.arguments),
        })
        .collect();

    Ok(StructuredResponse {
        thoughts: wire.thoughts.filter(|t| !t.trim().is_empty()),
        plan: plan.filter(|p| !p.trim().is_empty()),
        tool_calls,
        final_message: wire.final_message,
    })
}

/// Tool arguments sometimes arrive double-encoded as a JSON string.
/// A string that does not decode is kept as-is so schema validation can
/// reject it with a useful message.
pub fn decode_arguments(arguments: serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return serde_json::Value::Object(serde_json::Map::new());
            }
            serde_json::from_str(trimmed).unwrap_or(serde_json::Value::String(s))
        }
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other,
    }
}

/// Find the outermost `{ ... }` span, skipping a Markdown code fence if any.
fn extract_json_object(raw: &str) -> Option<&str> {
    let text = raw.trim();
    let text = match text.find("```") {
        Some(fence_start) => {
            let after = &text[fence_start + 3..];
            let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
            let body = &after[body_start..];
            match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => text,
    };

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
