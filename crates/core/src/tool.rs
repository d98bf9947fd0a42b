//! Tool trait and registry — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. Each one
//! is registered once under a unique name; the registry validates arguments
//! against the tool's schema before any handler code runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ToolError;
use crate::schema::validate_arguments;

/// A manifest entry describing one tool to the model.
///
/// This is what [`ToolRegistry::describe`] hands out: everything the model
/// needs to call the tool, and nothing that lets the caller run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// What a tool handler produces on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text sent back to the model as the tool result.
    pub content: String,

    /// Optional structured result (recorded in the run history).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    /// A plain-text result.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: None,
        }
    }

    /// A result with a structured value next to its text rendering.
    pub fn with_data(content: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            content: content.into(),
            data: Some(data),
        }
    }

    /// The value recorded in history: structured data when present,
    /// otherwise the text content.
    pub fn result_value(&self) -> serde_json::Value {
        self.data
            .clone()
            .unwrap_or_else(|| serde_json::Value::String(self.content.clone()))
    }
}

/// The core Tool trait.
///
/// Implementations must be safe to call from several runs at once; the
/// registry is shared across every run of a session.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError>;

    /// Convert this tool into a manifest entry.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// Ordered by name so manifests (and therefore system prompts) are stable
/// across processes.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// The tool manifest (name, description, schema) for prompt rendering.
    pub fn describe(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Validate `arguments` against the tool's schema and run it.
    ///
    /// Handler failures come back as [`ToolError::ExecutionFailed`]; a
    /// handler rejecting its own arguments keeps the `InvalidArguments`
    /// variant. The registry never retries.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        validate_arguments(&arguments, &tool.parameters_schema())
            .map_err(|reason| ToolError::invalid_arguments(name, reason))?;

        debug!(tool = name, "Invoking tool");

        tool.execute(arguments).await.map_err(|e| match e {
            ToolError::ExecutionFailed { .. } | ToolError::InvalidArguments { .. } => e,
            other => ToolError::execution(name, other.to_string()),
        })
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
