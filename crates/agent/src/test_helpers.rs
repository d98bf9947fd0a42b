//! Shared test helpers for engine and session tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::error::{ModelError, ToolError};
use stepwise_core::gateway::{ModelGateway, StructuredResponse};
use stepwise_core::message::Conversation;
use stepwise_core::run::IterationLogEntry;
use stepwise_core::tool::{Tool, ToolOutput, ToolRegistry};
use tokio::sync::{Barrier, Notify};
use tokio_util::sync::CancellationToken;

/// A mock gateway that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided, unless
/// `repeat_last` is set.
pub struct SequentialMockGateway {
    responses: Mutex<Vec<Result<StructuredResponse, ModelError>>>,
    call_count: Mutex<usize>,
    repeat_last: bool,
    gate: Option<Arc<Notify>>,
    conversations: Mutex<Vec<Conversation>>,
    opened_with: Mutex<Option<String>>,
    released: AtomicBool,
}

impl SequentialMockGateway {
    pub fn new(responses: Vec<Result<StructuredResponse, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            repeat_last: false,
            gate: None,
            conversations: Mutex::new(Vec::new()),
            opened_with: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    /// Keep returning the last response once the queue is exhausted.
    pub fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Hold every call until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// The conversation passed to each call, in call order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.lock().unwrap().clone()
    }

    pub fn opened_with(&self) -> Option<String> {
        self.opened_with.lock().unwrap().clone()
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelGateway for SequentialMockGateway {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn open(&self, system_prompt: &str) -> Result<(), ModelError> {
        *self.opened_with.lock().unwrap() = Some(system_prompt.to_string());
        Ok(())
    }

    async fn complete(
        &self,
        conversation: &Conversation,
    ) -> Result<StructuredResponse, ModelError> {
        self.conversations.lock().unwrap().push(conversation.clone());

        let response = {
            let mut count = self.call_count.lock().unwrap();
            let responses = self.responses.lock().unwrap();

            let index = if *count >= responses.len() && self.repeat_last && !responses.is_empty() {
                responses.len() - 1
            } else {
                *count
            };
            if index >= responses.len() {
                panic!(
                    "SequentialMockGateway: no more responses (call #{}, have {})",
                    *count,
                    responses.len()
                );
            }

            *count += 1;
            responses[index].clone()
        };

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        response
    }

    async fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Registry holding only the built-in calculator.
pub fn calculator_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Box::new(stepwise_tools::calculator::CalculatorTool))
        .unwrap();
    registry
}

pub fn registry_with(tools: Vec<Box<dyn Tool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool).unwrap();
    }
    registry
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Always fails with "exploded".
pub struct FailingTool {
    invocations: Arc<AtomicUsize>,
}

impl FailingTool {
    pub fn new() -> Self {
        Self {
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invocations(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "A tool that always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::execution("broken", "exploded"))
    }
}

/// Waits on a shared barrier; two of these only finish if run concurrently.
pub struct BarrierTool {
    name: String,
    barrier: Arc<Barrier>,
}

impl BarrierTool {
    pub fn new(name: &str, barrier: Arc<Barrier>) -> Self {
        Self {
            name: name.to_string(),
            barrier,
        }
    }
}

#[async_trait]
impl Tool for BarrierTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waits for its sibling"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.barrier.wait().await;
        Ok(ToolOutput::text(format!("{} passed the barrier", self.name)))
    }
}

/// Cancels the given token, then succeeds.
pub struct CancellingTool {
    token: CancellationToken,
    invocations: Arc<AtomicUsize>,
}

impl CancellingTool {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invocations(&self) -> Arc<AtomicUsize> {
        self.invocations.clone()
    }
}

#[async_trait]
impl Tool for CancellingTool {
    fn name(&self) -> &str {
        "cancel_run"
    }

    fn description(&self) -> &str {
        "Cancels the run it is part of"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.token.cancel();
        Ok(ToolOutput::text("cancellation requested"))
    }
}

/// Blocks until its gate is notified, then records that it finished.
pub struct GatedTool {
    name: String,
    gate: Arc<Notify>,
    finished: Arc<AtomicBool>,
}

impl GatedTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gate: Arc::new(Notify::new()),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn gate(&self) -> Arc<Notify> {
        self.gate.clone()
    }

    pub fn finished(&self) -> Arc<AtomicBool> {
        self.finished.clone()
    }
}

#[async_trait]
impl Tool for GatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waits until released"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        empty_schema()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        self.gate.notified().await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(ToolOutput::text("released"))
    }
}

/// History with every timestamp cleared, for replay comparisons.
pub fn without_timestamps(history: &[IterationLogEntry]) -> Vec<IterationLogEntry> {
    history
        .iter()
        .cloned()
        .map(|mut entry| {
            for call in &mut entry.tool_calls {
                call.started_at = None;
                call.finished_at = None;
            }
            entry
        })
        .collect()
}
