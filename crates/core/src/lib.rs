//! # Stepwise Core
//!
//! Domain types, traits, and error definitions for the Stepwise agent run
//! engine. This crate has **no runtime dependencies** beyond `tokio::sync`;
//! it defines the model that every other crate implements against.
//!
//! ## Design
//!
//! The two capabilities a run consumes are traits here:
//! - [`ModelGateway`] answers "what next?" for a conversation
//! - [`Tool`] executes one named action, held in a [`ToolRegistry`]
//!
//! The engine, providers, and tools live in their own crates and depend
//! inward on this one.

pub mod error;
pub mod event;
pub mod gateway;
pub mod message;
pub mod run;
pub mod schema;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ModelError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use gateway::{ModelGateway, StructuredResponse, ToolRequest, parse_structured};
pub use message::{Conversation, ConversationId, Message, MessageToolCall, Role};
pub use run::{IterationLogEntry, RunOutcome, RunState, RunStatus, ToolCall, ToolCallStatus};
pub use tool::{Tool, ToolDefinition, ToolOutput, ToolRegistry};
