//! IterationEngine — drives one run from a seeded conversation to a
//! terminal status.
//!
//! Each iteration:
//!
//! 1. **Check** cancellation; stop before any new model or tool call
//! 2. **Ask** the model gateway for the next structured response
//! 3. **Finish** if it carries no tool calls
//! 4. **Dispatch** every requested tool call concurrently and wait for all
//! 5. **Append** each result to the conversation as a tool-result message
//! 6. **Fold** the settled calls into a history entry
//! 7. **Stop** with a limit notice once the iteration cap is reached
//!
//! Only an unavailable model or an internal failure (a panicked engine
//! task) ends a run as `failed`. Tool errors go back to the model.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use stepwise_core::error::{ModelError, ToolError};
use stepwise_core::event::{DomainEvent, EventBus};
use stepwise_core::gateway::{ModelGateway, StructuredResponse};
use stepwise_core::message::{Conversation, Message, MessageToolCall, Role};
use stepwise_core::run::{IterationLogEntry, RunOutcome, ToolCall, ToolCallStatus};
use stepwise_core::tool::{ToolOutput, ToolRegistry};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::handle::{RunHandle, RunPublisher};

/// Error message recorded on tool calls still in flight when a run is
/// cancelled.
pub const CANCELLED_BEFORE_COMPLETION: &str = "cancelled before completion";

/// Final message used when the model concludes without saying anything.
pub const EMPTY_RESPONSE_NOTICE: &str = "The model finished without a final message.";

/// The synthetic final message of a run that hit its iteration cap.
pub fn limit_notice(max_iterations: usize) -> String {
    format!(
        "Stopped after reaching the iteration limit ({max_iterations}) before the task was finished."
    )
}

fn limit_outcome(max_iterations: usize) -> RunOutcome {
    RunOutcome::Completed {
        message: limit_notice(max_iterations),
        limit_reached: true,
    }
}

/// Builder and launcher for a single run.
///
/// ```ignore
/// let handle = IterationEngine::new(gateway, tools)
///     .with_max_iterations(5)
///     .spawn(Conversation::seeded(&system_prompt, "What's 2+2?"));
/// let outcome = handle.outcome().await;
/// ```
pub struct IterationEngine {
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    run_id: Option<String>,
    max_iterations: usize,
    token: CancellationToken,
    session_token: CancellationToken,
    event_capacity: usize,
    bus: Option<Arc<EventBus>>,
}

impl IterationEngine {
    pub fn new(gateway: Arc<dyn ModelGateway>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            gateway,
            tools,
            run_id: None,
            max_iterations: 10,
            token: CancellationToken::new(),
            session_token: CancellationToken::new(),
            event_capacity: 256,
            bus: None,
        }
    }

    /// Set the iteration cap. Zero completes immediately with the limit notice.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Use `token` as the run's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// A second token, shared by every run of a session, that also cancels.
    pub(crate) fn with_session_token(mut self, token: CancellationToken) -> Self {
        self.session_token = token;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Buffer size of the run's event channel.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Publish tool and lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Start the run on the current Tokio runtime and return immediately.
    ///
    /// The engine runs in its own task, watched by a supervisor task that
    /// turns a panic into a `failed` outcome.
    pub fn spawn(self, conversation: Conversation) -> RunHandle {
        let run_id = self
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (publisher, handle) =
            RunPublisher::channel(&run_id, self.token.clone(), self.event_capacity);
        let publisher = Arc::new(publisher);

        if let Some(bus) = &self.bus {
            bus.publish(DomainEvent::RunStarted {
                run_id: run_id.clone(),
                task_preview: task_preview(&conversation),
                timestamp: Utc::now(),
            });
        }

        let run = EngineRun {
            run_id: run_id.clone(),
            gateway: self.gateway,
            tools: self.tools,
            max_iterations: self.max_iterations,
            token: self.token,
            session_token: self.session_token,
            publisher: Arc::clone(&publisher),
            bus: self.bus.clone(),
        };

        let engine_task = tokio::spawn(run.run(conversation));
        let bus = self.bus;
        tokio::spawn(async move {
            let outcome = match engine_task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Engine task failed");
                    let outcome = RunOutcome::Failed {
                        reason: format!("internal error: {e}"),
                    };
                    publisher.finish(outcome.clone());
                    outcome
                }
            };

            if let Some(bus) = bus {
                bus.publish(DomainEvent::RunFinished {
                    run_id,
                    status: outcome.status(),
                    iterations: publisher.history_len(),
                    timestamp: Utc::now(),
                });
            }
        });

        handle
    }
}

/// First line of the last user message, for event previews.
fn task_preview(conversation: &Conversation) -> String {
    conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.lines().next().unwrap_or_default().chars().take(80).collect())
        .unwrap_or_default()
}

/// The state of one executing run.
struct EngineRun {
    run_id: String,
    gateway: Arc<dyn ModelGateway>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
    token: CancellationToken,
    session_token: CancellationToken,
    publisher: Arc<RunPublisher>,
    bus: Option<Arc<EventBus>>,
}

impl EngineRun {
    async fn run(self, mut conversation: Conversation) -> RunOutcome {
        info!(
            run_id = %self.run_id,
            gateway = self.gateway.name(),
            max_iterations = self.max_iterations,
            "Run started"
        );

        let outcome = self.drive(&mut conversation).await;

        match &outcome {
            RunOutcome::Completed {
                limit_reached: true,
                ..
            } => warn!(run_id = %self.run_id, "Iteration limit reached"),
            RunOutcome::Completed { .. } => info!(run_id = %self.run_id, "Run completed"),
            RunOutcome::Cancelled => info!(run_id = %self.run_id, "Run cancelled"),
            RunOutcome::Failed { reason } => warn!(run_id = %self.run_id, %reason, "Run failed"),
        }

        self.publisher.finish(outcome.clone());
        outcome
    }

    fn cancel_requested(&self) -> bool {
        self.token.is_cancelled() || self.session_token.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.session_token.cancelled() => {}
        }
    }

    async fn drive(&self, conversation: &mut Conversation) -> RunOutcome {
        for index in 1..=self.max_iterations {
            if self.cancel_requested() {
                debug!(run_id = %self.run_id, iteration = index, "Cancellation observed");
                return RunOutcome::Cancelled;
            }

            self.publisher.start_iteration(&IterationLogEntry::new(index));
            debug!(
                run_id = %self.run_id,
                iteration = index,
                messages = conversation.len(),
                "Calling model"
            );

            let response = match self.gateway.complete(conversation).await {
                Ok(response) => response,
                Err(ModelError::Response { raw, reason }) => {
                    warn!(
                        run_id = %self.run_id,
                        iteration = index,
                        %reason,
                        "Unparseable model response, using raw text as final message"
                    );
                    StructuredResponse::final_only(raw)
                }
                Err(e @ ModelError::Unavailable(_)) => {
                    return RunOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            };

            // The response of an interrupted iteration is discarded.
            if self.cancel_requested() {
                debug!(run_id = %self.run_id, iteration = index, "Cancellation observed after model call");
                return RunOutcome::Cancelled;
            }

            if !response.has_tool_calls() {
                return self.conclude(index, response, conversation);
            }

            if let Some(outcome) = self.dispatch(index, response, conversation).await {
                return outcome;
            }
        }

        limit_outcome(self.max_iterations)
    }

    /// Record the final answer and complete the run.
    fn conclude(
        &self,
        index: usize,
        response: StructuredResponse,
        conversation: &mut Conversation,
    ) -> RunOutcome {
        let message = response
            .final_text()
            .map(str::to_string)
            .or_else(|| non_blank(&response.thoughts))
            .or_else(|| non_blank(&response.plan))
            .unwrap_or_else(|| EMPTY_RESPONSE_NOTICE.to_string());

        conversation.push(Message::assistant(&message));
        self.publisher.complete_iteration(IterationLogEntry {
            index,
            thoughts: response.thoughts,
            plan: response.plan,
            tool_calls: Vec::new(),
            final_message: Some(message.clone()),
        });

        RunOutcome::Completed {
            message,
            limit_reached: false,
        }
    }

    /// Run every requested tool concurrently and fold the iteration.
    ///
    /// Returns `Some(Cancelled)` when cancellation fired while calls were in
    /// flight; those calls keep running detached and are recorded as errors.
    async fn dispatch(
        &self,
        index: usize,
        mut response: StructuredResponse,
        conversation: &mut Conversation,
    ) -> Option<RunOutcome> {
        if response.final_text().is_some() {
            debug!(run_id = %self.run_id, iteration = index, "Final message deferred until tool calls settle");
        }

        let mut seen = HashSet::new();
        for (position, request) in response.tool_calls.iter_mut().enumerate() {
            let id = unique_call_id(&mut seen, request.id.as_deref(), index, position);
            request.id = Some(id);
        }

        let mut entry = IterationLogEntry {
            index,
            thoughts: response.thoughts.clone(),
            plan: response.plan.clone(),
            tool_calls: response
                .tool_calls
                .iter()
                .map(|r| {
                    ToolCall::pending(
                        r.id.clone().unwrap_or_default(),
                        &r.name,
                        r.arguments.clone(),
                    )
                })
                .collect(),
            final_message: None,
        };
        self.publisher.update_iteration(&entry);

        response.final_message = None;
        let mut assistant = Message::assistant(serde_json::to_string(&response).unwrap_or_default());
        assistant.tool_calls = entry
            .tool_calls
            .iter()
            .map(|c| MessageToolCall {
                id: c.id.clone(),
                name: c.tool_name.clone(),
                arguments: c.arguments.clone(),
            })
            .collect();
        conversation.push(assistant);

        for call in &mut entry.tool_calls {
            call.mark_running();
        }
        self.publisher.update_iteration(&entry);
        debug!(
            run_id = %self.run_id,
            iteration = index,
            tools = entry.tool_calls.len(),
            "Dispatching tool calls"
        );

        let mut pending: FuturesUnordered<_> = entry
            .tool_calls
            .iter()
            .enumerate()
            .map(|(slot, call)| {
                let tools = Arc::clone(&self.tools);
                let name = call.tool_name.clone();
                let arguments = call.arguments.clone();
                let task = tokio::spawn(async move { tools.invoke(&name, arguments).await });
                async move { (slot, task.await) }
            })
            .collect();

        let mut replies: Vec<Option<String>> = vec![None; entry.tool_calls.len()];
        let mut interrupted = false;

        while !pending.is_empty() {
            tokio::select! {
                biased;
                Some((slot, joined)) = pending.next() => {
                    replies[slot] = Some(self.settle(&mut entry.tool_calls[slot], joined));
                    self.publisher.update_iteration(&entry);
                }
                _ = self.cancelled() => {
                    interrupted = true;
                    break;
                }
            }
        }
        // Unsettled tasks keep running detached.
        drop(pending);

        if interrupted {
            for call in entry
                .tool_calls
                .iter_mut()
                .filter(|c| !c.status.is_terminal())
            {
                call.mark_error(CANCELLED_BEFORE_COMPLETION);
            }
            info!(run_id = %self.run_id, iteration = index, "Cancelled while tool calls were in flight");
            self.publisher.complete_iteration(entry);
            return Some(RunOutcome::Cancelled);
        }

        for (call, reply) in entry.tool_calls.iter().zip(replies) {
            conversation.push(Message::tool_result(&call.id, reply.unwrap_or_default()));
        }
        self.publisher.complete_iteration(entry);
        None
    }

    /// Record one tool outcome and return the text the model will see.
    fn settle(
        &self,
        call: &mut ToolCall,
        joined: Result<Result<ToolOutput, ToolError>, JoinError>,
    ) -> String {
        let reply = match joined {
            Ok(Ok(output)) => {
                call.mark_success(output.result_value());
                output.content
            }
            Ok(Err(e)) => {
                warn!(run_id = %self.run_id, tool = %call.tool_name, error = %e, "Tool call failed");
                let message = e.to_string();
                call.mark_error(&message);
                format!("Error: {message}")
            }
            Err(e) => {
                warn!(run_id = %self.run_id, tool = %call.tool_name, error = %e, "Tool task aborted");
                let message = format!("tool task aborted: {e}");
                call.mark_error(&message);
                format!("Error: {message}")
            }
        };

        debug!(run_id = %self.run_id, tool = %call.tool_name, status = ?call.status, "Tool call settled");

        if let Some(bus) = &self.bus {
            bus.publish(DomainEvent::ToolExecuted {
                run_id: self.run_id.clone(),
                tool_name: call.tool_name.clone(),
                success: call.status == ToolCallStatus::Success,
                duration_ms: call.duration_ms().unwrap_or(0),
                timestamp: Utc::now(),
            });
        }

        reply
    }
}

fn non_blank(text: &Option<String>) -> Option<String> {
    text.as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Keep the model's call id when usable, otherwise `call_<iteration>_<n>`.
fn unique_call_id(
    seen: &mut HashSet<String>,
    preferred: Option<&str>,
    iteration: usize,
    position: usize,
) -> String {
    if let Some(id) = preferred.filter(|id| !id.trim().is_empty())
        && seen.insert(id.to_string())
    {
        return id.to_string();
    }

    let base = format!("call_{iteration}_{}", position + 1);
    let mut candidate = base.clone();
    let mut suffix = 1;
    while !seen.insert(candidate.clone()) {
        suffix += 1;
        candidate = format!("{base}_{suffix}");
    }
    candidate
}
