//! Echo tool — returns its input unchanged. Handy for wiring checks.

use async_trait::async_trait;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolOutput};

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Return the given text unchanged."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to echo back" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let text = arguments["text"]
            .as_str()
            .ok_or_else(|| ToolError::invalid_arguments("echo", "missing required field 'text'"))?;
        Ok(ToolOutput::text(text))
    }
}
