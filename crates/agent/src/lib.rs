//! The Stepwise agent run engine.
//!
//! A run alternates between asking the model what to do next and executing
//! the tools it asks for:
//!
//! 1. **Seed** a conversation with the session's system prompt and the task
//! 2. **Ask** the model gateway for a structured response
//! 3. **If tool calls**: run them concurrently, append their results, loop
//! 4. **If a final message**: complete the run with it
//!
//! The loop also stops on cancellation, on an unavailable model, or when
//! the iteration cap is reached. Every step is observable through the
//! [`RunHandle`] returned when the run starts.

pub mod engine;
pub mod event;
pub mod handle;
pub mod prompt;
pub mod session;
pub mod transcript;

#[cfg(test)]
mod test_helpers;

pub use engine::{CANCELLED_BEFORE_COMPLETION, EMPTY_RESPONSE_NOTICE, IterationEngine, limit_notice};
pub use event::RunEvent;
pub use handle::RunHandle;
pub use prompt::render_system_prompt;
pub use session::{AgentSession, SessionConfig};
pub use transcript::Transcript;
pub use tokio_util::sync::CancellationToken;
