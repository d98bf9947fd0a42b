//! `stepwise run` — Run one task and stream its progress.
//!
//! Progress goes to stdout as iterations happen; Ctrl-C requests
//! cooperative cancellation (the run stops before its next model or tool
//! call, in-flight calls are not interrupted).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use stepwise_agent::{AgentSession, RunEvent, SessionConfig};
use stepwise_config::AppConfig;
use stepwise_core::run::{IterationLogEntry, RunOutcome, ToolCall, ToolCallStatus};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

pub struct RunArgs {
    pub task: String,
    pub max_iterations: Option<usize>,
    pub export: Option<PathBuf>,
    pub script: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.script.is_none() && !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STEPWISE_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY");
        eprintln!();
        eprintln!("  Or add api_key to {}", AppConfig::config_path().display());
        eprintln!("  (or replay a canned run with --script <file.json>)");
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let gateway = stepwise_providers::build_from_config(config, args.script.as_deref())?;
    let tools = Arc::new(stepwise_tools::default_registry()?);
    let session = AgentSession::create(gateway, tools, SessionConfig::from(&config.agent)).await?;

    let max_iterations = args.max_iterations.unwrap_or(config.agent.max_iterations);
    let handle = session.run(args.task, max_iterations, None);
    tracing::debug!(run_id = %handle.run_id(), max_iterations, "Run launched");
    let mut events = Box::pin(handle.event_stream());
    let mut progress = Progress::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(event)) => progress.observe(&event),
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    eprintln!("  ({n} progress events skipped)");
                }
                None => break,
            },
            _ = &mut ctrl_c, if !cancelling => {
                eprintln!("  Cancelling after the current step...");
                handle.cancel();
                cancelling = true;
            }
        }
    }

    let outcome = handle.outcome().await;

    if let Some(path) = &args.export {
        handle.transcript().write_to(path)?;
        eprintln!("  Transcript written to {}", path.display());
    }

    session.destroy().await;

    match outcome {
        RunOutcome::Completed {
            message,
            limit_reached,
        } => {
            println!();
            println!("{message}");
            if limit_reached {
                eprintln!("  ⚠️  Iteration limit ({max_iterations}) reached");
            }
            Ok(())
        }
        RunOutcome::Cancelled => {
            eprintln!("  Run cancelled.");
            Ok(())
        }
        RunOutcome::Failed { reason } => Err(format!("Run failed: {reason}").into()),
    }
}

/// Prints each iteration's reasoning and each tool call once, as they settle.
#[derive(Default)]
struct Progress {
    narrated: HashSet<usize>,
    settled: HashSet<(usize, String)>,
}

impl Progress {
    fn observe(&mut self, event: &RunEvent) {
        match event {
            RunEvent::IterationStarted { index } => println!("── Iteration {index} ──"),
            RunEvent::IterationUpdated { entry } => {
                for line in self.lines_for(entry) {
                    println!("{line}");
                }
            }
            RunEvent::IterationCompleted { entry } => {
                for line in self.lines_for(entry) {
                    println!("{line}");
                }
                if let Some(summary) = failure_summary(entry) {
                    println!("{summary}");
                }
            }
            RunEvent::StatusChanged { .. } | RunEvent::Finished { .. } => {}
        }
    }

    fn lines_for(&mut self, entry: &IterationLogEntry) -> Vec<String> {
        let mut lines = Vec::new();

        if (entry.thoughts.is_some() || entry.plan.is_some()) && self.narrated.insert(entry.index)
        {
            if let Some(thoughts) = &entry.thoughts {
                lines.push(format!("  💭 {}", thoughts.trim()));
            }
            if let Some(plan) = &entry.plan {
                for step in plan.lines().filter(|l| !l.trim().is_empty()) {
                    lines.push(format!("  📋 {}", step.trim()));
                }
            }
        }

        for call in entry.tool_calls.iter().filter(|c| c.status.is_terminal()) {
            if self.settled.insert((entry.index, call.id.clone())) {
                lines.push(describe_call(call));
            }
        }

        lines
    }
}

/// Shown under an iteration where some tool calls failed; the model sees
/// the errors and gets a chance to recover on the next iteration.
fn failure_summary(entry: &IterationLogEntry) -> Option<String> {
    match entry.failed_calls() {
        0 => None,
        failed => Some(format!(
            "  ⚠️  {failed} of {} tool calls failed",
            entry.tool_calls.len()
        )),
    }
}

fn describe_call(call: &ToolCall) -> String {
    match call.status {
        ToolCallStatus::Success => format!(
            "  ✓ {}({}) → {}",
            call.tool_name,
            call.arguments,
            call.result
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default()
        ),
        _ => format!(
            "  ✗ {}({}): {}",
            call.tool_name,
            call.arguments,
            call.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}
