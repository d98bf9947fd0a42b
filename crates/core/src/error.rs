//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] ties them together.

use thiserror::Error;

/// The top-level error type for all Stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model gateway errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures reported by a [`ModelGateway`](crate::gateway::ModelGateway).
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// The model service could not be reached or refused the request.
    /// Transient; the engine surfaces it and fails the run.
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    /// The model answered but the answer could not be parsed into a
    /// structured response. `raw` carries the unparsed text.
    #[error("Unparseable model response: {reason}")]
    Response { raw: String, reason: String },
}

impl ModelError {
    /// Convenience constructor for an unparseable response.
    pub fn response(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Response {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by the tool registry or a tool handler.
///
/// None of these ever terminate a run: the engine reports them to the model
/// as tool results.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool already registered: {0}")]
    Duplicate(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },
}

impl ToolError {
    /// Build an execution failure for `tool_name`.
    pub fn execution(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    /// Build an argument validation failure for `tool_name`.
    pub fn invalid_arguments(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}
