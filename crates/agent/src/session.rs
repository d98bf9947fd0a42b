//! AgentSession — owns one model gateway and one tool registry, and starts
//! runs against them.
//!
//! A session renders its system prompt once at creation and hands the model
//! gateway that prompt through `open`. Every run gets a fresh conversation
//! seeded with the prompt and the user's input. Runs of the same session
//! share nothing else and may execute concurrently.

use std::sync::Arc;

use stepwise_config::AgentConfig;
use stepwise_core::error::Result;
use stepwise_core::event::{DomainEvent, EventBus};
use stepwise_core::gateway::ModelGateway;
use stepwise_core::message::Conversation;
use stepwise_core::tool::ToolRegistry;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::IterationEngine;
use crate::handle::RunHandle;
use crate::prompt::render_system_prompt;

/// Per-session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub persona: Option<String>,
    pub instructions: Option<String>,
    /// Iteration cap used by [`AgentSession::prompt`].
    pub max_iterations: usize,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for SessionConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            persona: config.persona.clone(),
            instructions: config.instructions.clone(),
            max_iterations: config.max_iterations,
            event_capacity: config.event_capacity,
        }
    }
}

pub struct AgentSession {
    id: String,
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    config: SessionConfig,
    root: CancellationToken,
    bus: Arc<EventBus>,
}

impl AgentSession {
    /// Render the system prompt from the registry's manifest and open the
    /// gateway with it.
    pub async fn create(
        gateway: Arc<dyn ModelGateway>,
        tools: Arc<ToolRegistry>,
        config: SessionConfig,
    ) -> Result<Self> {
        let system_prompt = render_system_prompt(
            &tools.describe(),
            config.persona.as_deref(),
            config.instructions.as_deref(),
        );

        gateway.open(&system_prompt).await?;

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            session_id = %id,
            gateway = gateway.name(),
            tools = tools.len(),
            "Session created"
        );

        Ok(Self {
            id,
            gateway,
            tools,
            system_prompt,
            bus: Arc::new(EventBus::new(config.event_capacity)),
            config,
            root: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Tool and run lifecycle events for every run of this session.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.bus.subscribe()
    }

    /// Start a run and return its handle immediately.
    ///
    /// Cancelling `cancel` (or the returned handle) stops the run
    /// cooperatively. Must be called from within a Tokio runtime.
    pub fn run(
        &self,
        input: impl Into<String>,
        max_iterations: usize,
        cancel: Option<CancellationToken>,
    ) -> RunHandle {
        let token = cancel.map(|t| t.child_token()).unwrap_or_default();
        let conversation = Conversation::seeded(&self.system_prompt, input);

        IterationEngine::new(Arc::clone(&self.gateway), Arc::clone(&self.tools))
            .with_max_iterations(max_iterations)
            .with_cancellation(token)
            .with_session_token(self.root.clone())
            .with_event_capacity(self.config.event_capacity)
            .with_event_bus(Arc::clone(&self.bus))
            .spawn(conversation)
    }

    /// [`run`](Self::run) with the session's default iteration cap and no
    /// external cancellation.
    pub fn prompt(&self, input: impl Into<String>) -> RunHandle {
        self.run(input, self.config.max_iterations, None)
    }

    /// Cancel every active run and release the gateway.
    pub async fn destroy(self) {
        self.root.cancel();
        self.gateway.release().await;
        info!(session_id = %self.id, "Session destroyed");
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("id", &self.id)
            .field("gateway", &self.gateway.name())
            .field("tools", &self.tools.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use stepwise_core::gateway::{StructuredResponse, ToolRequest};
    use stepwise_core::run::{RunOutcome, RunStatus};
    use tokio::sync::Notify;

    async fn session(gateway: Arc<SequentialMockGateway>) -> AgentSession {
        AgentSession::create(
            gateway,
            Arc::new(calculator_registry()),
            SessionConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_opens_gateway_with_rendered_prompt() {
        let gateway = Arc::new(SequentialMockGateway::new(vec![]));
        let session = AgentSession::create(
            gateway.clone(),
            Arc::new(calculator_registry()),
            SessionConfig {
                persona: Some("You are terse.".into()),
                ..SessionConfig::default()
            },
        )
        .await
        .unwrap();

        let opened = gateway.opened_with().unwrap();
        assert_eq!(opened, session.system_prompt());
        assert!(opened.contains("You are terse."));
        assert!(opened.contains("- calculator:"));
    }

    #[tokio::test]
    async fn each_run_gets_a_fresh_conversation() {
        let gateway = Arc::new(SequentialMockGateway::new(vec![
            Ok(StructuredResponse::final_only("first")),
            Ok(StructuredResponse::final_only("second")),
        ]));
        let session = session(gateway.clone()).await;

        assert_eq!(session.prompt("one").outcome().await.message(), Some("first"));
        assert_eq!(session.prompt("two").outcome().await.message(), Some("second"));

        let conversations = gateway.conversations();
        assert_eq!(conversations.len(), 2);
        for (conversation, input) in conversations.iter().zip(["one", "two"]) {
            assert_eq!(conversation.len(), 2);
            assert_eq!(conversation.messages[0].content, session.system_prompt());
            assert_eq!(conversation.messages[1].content, input);
        }
    }

    #[tokio::test]
    async fn prompt_uses_default_iteration_cap() {
        let gateway = Arc::new(
            SequentialMockGateway::new(vec![Ok(StructuredResponse::tools(vec![
                ToolRequest::new("calculator", json!({"expr": "1+1"})),
            ]))])
            .repeat_last(),
        );
        let session = AgentSession::create(
            gateway.clone(),
            Arc::new(calculator_registry()),
            SessionConfig {
                max_iterations: 3,
                ..SessionConfig::default()
            },
        )
        .await
        .unwrap();

        let handle = session.prompt("loop");
        let outcome = handle.outcome().await;
        assert!(matches!(
            outcome,
            RunOutcome::Completed {
                limit_reached: true,
                ..
            }
        ));
        assert_eq!(handle.history().len(), 3);
        assert_eq!(gateway.call_count(), 3);
    }

    #[tokio::test]
    async fn external_token_cancels_the_run() {
        let gateway = Arc::new(SequentialMockGateway::new(vec![]));
        let session = session(gateway.clone()).await;

        let token = CancellationToken::new();
        token.cancel();
        let handle = session.run("never", 5, Some(token));

        assert_eq!(handle.outcome().await, RunOutcome::Cancelled);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelling_a_handle_does_not_touch_the_callers_token() {
        let gateway = Arc::new(SequentialMockGateway::new(vec![]));
        let session = session(gateway).await;

        let token = CancellationToken::new();
        let handle = session.run("never", 5, Some(token.clone()));
        handle.cancel();

        assert_eq!(handle.outcome().await, RunOutcome::Cancelled);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn destroy_cancels_active_runs_and_releases_gateway() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(
            SequentialMockGateway::new(vec![Ok(StructuredResponse::final_only("too late"))])
                .gated(gate.clone()),
        );
        let session = session(gateway.clone()).await;

        let handle = session.prompt("slow model");
        // Let the run reach the model call.
        while gateway.call_count() == 0 {
            tokio::task::yield_now().await;
        }

        session.destroy().await;
        assert!(gateway.was_released());

        gate.notify_one();
        assert_eq!(handle.outcome().await, RunOutcome::Cancelled);
        assert_eq!(handle.status(), RunStatus::Cancelled);
        assert!(handle.history().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_events_reach_the_session_bus() {
        let gateway = Arc::new(SequentialMockGateway::new(vec![
            Ok(StructuredResponse::tools(vec![ToolRequest::new(
                "calculator",
                json!({"expr": "2+2"}),
            )])),
            Ok(StructuredResponse::final_only("4")),
        ]));
        let session = session(gateway).await;
        let mut events = session.subscribe();

        let handle = session.prompt("What's 2+2?");
        handle.outcome().await;

        match events.recv().await.unwrap().as_ref() {
            DomainEvent::RunStarted {
                run_id,
                task_preview,
                ..
            } => {
                assert_eq!(run_id, handle.run_id());
                assert_eq!(task_preview, "What's 2+2?");
            }
            other => panic!("Expected RunStarted, got {other:?}"),
        }
        match events.recv().await.unwrap().as_ref() {
            DomainEvent::ToolExecuted {
                tool_name, success, ..
            } => {
                assert_eq!(tool_name, "calculator");
                assert!(*success);
            }
            other => panic!("Expected ToolExecuted, got {other:?}"),
        }
        match events.recv().await.unwrap().as_ref() {
            DomainEvent::RunFinished {
                status, iterations, ..
            } => {
                assert_eq!(*status, RunStatus::Completed);
                assert_eq!(*iterations, 2);
            }
            other => panic!("Expected RunFinished, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_runs_are_independent() {
        let gateway = Arc::new(
            SequentialMockGateway::new(vec![Ok(StructuredResponse::final_only("ok"))])
                .repeat_last(),
        );
        let session = session(gateway.clone()).await;

        let handles: Vec<_> = (0..4).map(|i| session.prompt(format!("task {i}"))).collect();
        for handle in &handles {
            assert_eq!(handle.outcome().await.message(), Some("ok"));
            assert_eq!(handle.history().len(), 1);
        }

        let mut ids: Vec<_> = handles.iter().map(|h| h.run_id().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(gateway.call_count(), 4);
    }
}
