//! Current time tool — reports the wall-clock time.

use async_trait::async_trait;
use chrono::{Local, Utc};
use stepwise_core::error::ToolError;
use stepwise_core::tool::{Tool, ToolOutput};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time, in UTC (default) or the host's local timezone."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "enum": ["utc", "local"],
                    "description": "Which clock to read (default: utc)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let timezone = arguments["timezone"].as_str().unwrap_or("utc");
        let now = match timezone {
            "local" => Local::now().to_rfc3339(),
            _ => Utc::now().to_rfc3339(),
        };

        Ok(ToolOutput::with_data(
            now.clone(),
            serde_json::json!({ "timezone": timezone, "iso8601": now }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_parseable_timestamp() {
        let output = CurrentTimeTool
            .execute(serde_json::json!({}))
            .await
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&output.content).is_ok());
        assert_eq!(output.result_value()["timezone"], "utc");
    }

    #[tokio::test]
    async fn local_timezone_is_honoured() {
        let output = CurrentTimeTool
            .execute(serde_json::json!({"timezone": "local"}))
            .await
            .unwrap();
        assert_eq!(output.result_value()["timezone"], "local");
    }
}
