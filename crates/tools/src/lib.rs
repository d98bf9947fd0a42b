//! Built-in tool implementations for Stepwise.
//!
//! Small, side-effect-free tools that let a run do something useful out
//! of the box: arithmetic, reading the clock, echoing text.

pub mod calculator;
pub mod current_time;
pub mod echo;

use stepwise_core::error::ToolError;
use stepwise_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use current_time::CurrentTimeTool;
pub use echo::EchoTool;

/// Create a tool registry holding every built-in tool.
pub fn default_registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool))?;
    registry.register(Box::new(CurrentTimeTool))?;
    registry.register(Box::new(EchoTool))?;
    tracing::debug!(tools = registry.len(), "Built default tool registry");
    Ok(registry)
}
