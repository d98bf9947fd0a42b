//! OpenAI-compatible model gateway.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions`.
//!
//! The model is asked (through the system prompt) to answer with a JSON
//! object `{thoughts, plan, tool_calls, final_message}`. Answers that use
//! native function calling instead are accepted too.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stepwise_core::error::ModelError;
use stepwise_core::gateway::{
    ModelGateway, StructuredResponse, ToolRequest, decode_arguments, parse_structured,
};
use stepwise_core::message::{Conversation, Message, Role};
use tracing::{debug, warn};

/// A [`ModelGateway`] speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatGateway {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatGateway {
    /// Create a new gateway for `model` at `base_url`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ModelError> {
        Self::with_timeout(name, base_url, api_key, model, 120)
    }

    fn with_timeout(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ModelError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            client,
        })
    }

    /// Build a gateway from the application configuration.
    pub fn from_config(config: &stepwise_config::AppConfig) -> Result<Self, ModelError> {
        let mut gateway = Self::with_timeout(
            "openai-compat",
            &config.api_url,
            config.api_key.clone().unwrap_or_default(),
            &config.model,
            config.request_timeout_secs,
        )?;
        gateway.temperature = config.temperature;
        gateway.max_tokens = Some(config.max_tokens);
        Ok(gateway)
    }

    /// Create an OpenRouter gateway (convenience constructor).
    pub fn openrouter(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ModelError> {
        Self::new("openrouter", "https://openrouter.ai/api/v1", api_key, model)
    }

    /// Create an Ollama gateway (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, ModelError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
            model,
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Convert the conversation to OpenAI API messages.
    ///
    /// Assistant turns are replayed as their text; tool results travel as
    /// user messages tagged with the call they answer, so the request never
    /// depends on native function-calling support.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let (role, content) = match m.role {
                    Role::System => ("system", m.content.clone()),
                    Role::User => ("user", m.content.clone()),
                    Role::Assistant => ("assistant", m.content.clone()),
                    Role::ToolResult => (
                        "user",
                        format!(
                            "[tool result for call {}]\n{}",
                            m.tool_call_id.as_deref().unwrap_or("?"),
                            m.content
                        ),
                    ),
                };
                ApiMessage {
                    role: role.into(),
                    content: Some(content),
                    tool_calls: None,
                }
            })
            .collect()
    }

    async fn send(&self, conversation: &Conversation) -> Result<ApiMessage, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&conversation.messages),
            "temperature": self.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(gateway = %self.name, model = %self.model, messages = conversation.len(), "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(format!("network error: {e}")))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ModelError::Unavailable("rate limited (HTTP 429)".into()));
        }

        if status == 401 || status == 403 {
            return Err(ModelError::Unavailable(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model endpoint returned error");
            return Err(ModelError::Unavailable(format!(
                "HTTP {status}: {error_body}"
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Unavailable(format!("failed to read response: {e}")))?;

        read_envelope(&text)
    }
}

/// Pull the assistant message out of a chat-completions body.
///
/// Everything that goes wrong here is the endpoint's fault, not the
/// model's, so it surfaces as `Unavailable`. Some proxies report errors
/// with HTTP 200 and an `error` object.
fn read_envelope(text: &str) -> Result<ApiMessage, ModelError> {
    let api_response: ApiResponse = serde_json::from_str(text).map_err(|e| {
        warn!(body = %text, "Unrecognized completion body");
        ModelError::Unavailable(format!("malformed completion body: {e}"))
    })?;

    if let Some(error) = api_response.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        warn!(error = %message, "Model endpoint reported an error");
        return Err(ModelError::Unavailable(format!("provider error: {message}")));
    }

    api_response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| ModelError::Unavailable("no choices in completion body".into()))
}

/// Turn one assistant message into a structured response.
///
/// JSON in the content wins; native tool calls are the fallback. When
/// neither is present the raw content comes back as a response error.
fn interpret(message: ApiMessage) -> Result<StructuredResponse, ModelError> {
    let content = message.content.unwrap_or_default();

    match parse_structured(&content) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let native = message.tool_calls.unwrap_or_default();
            if native.is_empty() {
                return Err(err);
            }
            let tool_calls = native
                .into_iter()
                .map(|tc| ToolRequest {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: decode_arguments(tc.function.arguments),
                })
                .collect();
            let thoughts = Some(content).filter(|c| !c.trim().is_empty());
            Ok(StructuredResponse {
                thoughts,
                tool_calls,
                ..StructuredResponse::default()
            })
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAiCompatGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        conversation: &Conversation,
    ) -> Result<StructuredResponse, ModelError> {
        let message = self.send(conversation).await?;
        interpret(message)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    /// A JSON-encoded string on the wire.
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
