//! System prompt rendering.
//!
//! Sections are delimited with XML-style tags:
//!
//! ```text
//! <persona>...</persona>
//! <tools>...</tools>
//! <response_format>...</response_format>
//! <instructions>...</instructions>
//! ```

use stepwise_core::tool::ToolDefinition;

const DEFAULT_PERSONA: &str = concat!(
    "You are Stepwise, an assistant that completes tasks step by step. ",
    "Think about what is needed, call tools when they help, ",
    "and give a final answer once the task is done.",
);

const RESPONSE_FORMAT: &str = r#"Reply with a single JSON object and nothing else:
{
  "thoughts": "optional reasoning",
  "plan": "optional next steps",
  "tool_calls": [{"name": "<tool name>", "arguments": { ... }}],
  "final_message": "your answer to the user"
}
Either request tools with "tool_calls" or finish with "final_message".
If you request tools, their results arrive in the next message; do not
guess them. Independent tool calls in one reply run concurrently."#;

/// Render the system prompt from the tool manifest and optional
/// persona/instructions.
pub fn render_system_prompt(
    manifest: &[ToolDefinition],
    persona: Option<&str>,
    instructions: Option<&str>,
) -> String {
    let mut prompt = String::with_capacity(2048);

    let persona = persona
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PERSONA);
    push_section(&mut prompt, "persona", persona);

    let tools = if manifest.is_empty() {
        "No tools are available. Answer directly with \"final_message\".".to_string()
    } else {
        manifest
            .iter()
            .map(|tool| {
                format!(
                    "- {}: {}\n  arguments schema: {}",
                    tool.name, tool.description, tool.parameters
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    push_section(&mut prompt, "tools", &tools);
    push_section(&mut prompt, "response_format", RESPONSE_FORMAT);

    if let Some(instructions) = instructions.map(str::trim).filter(|i| !i.is_empty()) {
        push_section(&mut prompt, "instructions", instructions);
    }

    prompt
}

fn push_section(prompt: &mut String, tag: &str, content: &str) {
    if !prompt.is_empty() {
        prompt.push('\n');
    }
    prompt.push_str(&format!("<{tag}>\n"));
    prompt.push_str(content.trim());
    prompt.push_str(&format!("\n</{tag}>\n"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calculator() -> ToolDefinition {
        ToolDefinition {
            name: "calculator".into(),
            description: "Evaluate arithmetic".into(),
            parameters: json!({"type": "object", "properties": {"expr": {"type": "string"}}}),
        }
    }

    #[test]
    fn lists_every_tool_with_schema() {
        let prompt = render_system_prompt(&[calculator()], None, None);
        assert!(prompt.contains("<tools>"));
        assert!(prompt.contains("- calculator: Evaluate arithmetic"));
        assert!(prompt.contains(r#""expr""#));
        assert!(prompt.contains("final_message"));
    }

    #[test]
    fn persona_and_instructions_are_included() {
        let prompt = render_system_prompt(
            &[calculator()],
            Some("You are a pirate."),
            Some("Always greet the user."),
        );
        assert!(prompt.starts_with("<persona>\nYou are a pirate."));
        assert!(!prompt.contains(DEFAULT_PERSONA));
        assert!(prompt.contains("<instructions>\nAlways greet the user.\n</instructions>"));
    }

    #[test]
    fn blank_persona_falls_back_to_default() {
        let prompt = render_system_prompt(&[], Some("   "), None);
        assert!(prompt.contains(DEFAULT_PERSONA));
        assert!(prompt.contains("No tools are available"));
        assert!(!prompt.contains("<instructions>"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = render_system_prompt(&[calculator()], Some("p"), Some("i"));
        let b = render_system_prompt(&[calculator()], Some("p"), Some("i"));
        assert_eq!(a, b);
    }
}
