//! System prompt templating (C4 rendering half).

use crate::error::{Error, Result};
use handlebars::Handlebars;
use serde::Serialize;

/// A prompt template using Handlebars syntax
pub struct PromptTemplate {
    name: String,
    registry: Handlebars<'static>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();

        registry
        .register_template_string(&name, template)
        .map_err(|e| Error::Internal(format!("invalid template: {e}")))?;

        Ok(PromptTemplate { name, registry })
    }

    /// Render the template with the given data
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        self.registry
        .render(&self.name, data)
        .map_err(|e| Error::Internal(format!("template render error: {e}")))
    }
}

/// Fixed-text preamble: defines the
/// agent's role as a single-step executor, the legal `action_type`s and
/// their output shapes, and embeds the state-machine JSON verbatim via
/// `{{{current_state}}}` (triple-stash: the JSON must not be HTML-escaped).
pub const SYSTEM_PROMPT_TEMPLATE: &str = r#"You are a single-step executor driving one task forward through a sequence of recursions. On every call you are given the complete state of the task so far; you must decide exactly one next action and emit nothing but a single JSON object describing it.

Legal `action_type` values and their `action.result.output` shapes:

- `CALL_TOOL`: { "tool_calls": [ { "function": { "name": string, "arguments": object } } ] }
- `RE_PLAN`: { "plan": [ { "step_id": string, "description": string, "status": "pending" } ], "notes"?: string }
- `ANSWER`: { "answer": string }
- `CLARIFY`: { "question": string }
- `REFLECT`: { "note": string }

Respond with exactly one JSON object of this shape, and nothing else:

{ "trace_id": "...", "observe": "...", "thought": "...",
 "action": { "result": { "action_type": "CALL_TOOL|RE_PLAN|ANSWER|CLARIFY|REFLECT",
 "output": {... } } } }

## Current state

{{{current_state}}}
"#;

/// Build the rendered system prompt for one recursion, given the already
/// serialized state JSON (C4's output). The state is fed in as opaque text,
/// not as a nested template, so JSON punctuation isn't re-escaped.
pub fn render_system_prompt(state_json: &str) -> Result<String> {
    let template = PromptTemplate::new("system", SYSTEM_PROMPT_TEMPLATE)?;
    template.render(&serde_json::json!({ "current_state": state_json }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_embedded_state() {
        let rendered = render_system_prompt(r#"{"global":{"iteration":0}}"#).unwrap();
        assert!(rendered.contains(r#"{"global":{"iteration":0}}"#));
        assert!(rendered.contains("CALL_TOOL"));
    }

    #[test]
    fn does_not_html_escape_quotes() {
        let rendered = render_system_prompt(r#"{"a":"b"}"#).unwrap();
        assert!(!rendered.contains("&quot;"));
    }
}
