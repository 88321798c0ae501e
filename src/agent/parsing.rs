//! Tolerant parsing of the LLM's JSON envelope.
//!
//! Generalizes `Planner::parse_plan_response`'s "try direct JSON, then fall
//! back to heuristic extraction" idiom into the three-stage fallback the
//! spec requires, with the fenced-block-wins tie-break.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One legal next action, as decoded from the envelope's `action.result`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CallTool,
    RePlan,
    Answer,
    Clarify,
    Reflect,
    Error,
}

/// The parsed envelope the LLM is contracted to emit every recursion
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub observe: String,
    #[serde(default)]
    pub thought: String,
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Action {
    pub result: ActionResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    #[serde(default)]
    pub output: Value,
}

/// Parse the LLM's raw content into an `Envelope`, trying in order:
/// (a) direct JSON parse; (b) a fenced ```json block; (c) the maximal
/// `{...}` span. When both (a) and (b) would succeed, (b) wins — models
/// often prepend prose before the fenced block.
pub fn parse_envelope(content: &str) -> Result<Envelope> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::Parse("empty LLM response".to_string()));
    }

    let fenced = extract_fenced_json(trimmed);
    let direct = serde_json::from_str::<Envelope>(trimmed).ok();

    if let Some(block) = &fenced {
        if let Ok(env) = serde_json::from_str::<Envelope>(block) {
            return Ok(env);
        }
    }
    if let Some(env) = direct {
        return Ok(env);
    }
    if let Some(span) = extract_brace_span(trimmed) {
        if let Ok(env) = serde_json::from_str::<Envelope>(&span) {
            return Ok(env);
        }
    }

    Err(Error::Parse(format!(
                "failed to parse action envelope from response: {trimmed}"
    )))
}

/// Extract the contents of the first ```json... ``` (or bare ```... ```)
/// fenced code block, if any.
fn extract_fenced_json(text: &str) -> Option<String> {
    let start_marker_json = "```json";
    let start_marker_bare = "```";

    let (start, marker_len) = if let Some(pos) = text.find(start_marker_json) {
        (pos, start_marker_json.len())
    } else {
        let pos = text.find(start_marker_bare)?;
        (pos, start_marker_bare.len())
    };

    let body_start = start + marker_len;
    let end = text[body_start..].find("```")?;
    Some(text[body_start..body_start + end].trim().to_string())
}

/// Extract the maximal span from the first `{` to the last `}`.
fn extract_brace_span(text: &str) -> Option<String> {
    let first = text.find('{')?;
        let last = text.rfind('}')?;
    if last < first {
        return None;
    }
    Some(text[first..=last].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{"trace_id":"t1","observe":"ok","thought":"go",
"action":{"result":{"action_type":"ANSWER","output":{"answer":"16"}}}}"#;

    #[test]
    fn parses_direct_json() {
        let env = parse_envelope(VALID).unwrap();
        assert_eq!(env.action.result.action_type, ActionType::Answer);
    }

    #[test]
    fn parses_fenced_block_over_prose_preamble() {
        let text = format!("Sure, here is my plan:\n```json\n{VALID}\n```\nLet me know.");
        let env = parse_envelope(&text).unwrap();
        assert_eq!(env.action.result.action_type, ActionType::Answer);
    }

    #[test]
    fn fenced_block_wins_when_both_parse() {
        // A bare-parseable envelope with ANSWER, but a fenced block claiming CALL_TOOL.
        let call_tool = r#"{"trace_id":"t2","observe":"o","thought":"t",
"action":{"result":{"action_type":"CALL_TOOL","output":{"tool_calls":[]}}}}"#;
        let text = format!("{VALID}\n```json\n{call_tool}\n```");
        let env = parse_envelope(&text).unwrap();
        assert_eq!(env.action.result.action_type, ActionType::CallTool);
    }

    #[test]
    fn falls_back_to_brace_span() {
        let text = format!("The result is: {VALID} -- done.");
        let env = parse_envelope(&text).unwrap();
        assert_eq!(env.action.result.action_type, ActionType::Answer);
    }

    #[test]
    fn empty_response_is_parse_error() {
        assert!(parse_envelope("").is_err());
        assert!(parse_envelope(" ").is_err());
    }

    #[test]
    fn garbage_is_parse_error() {
        assert!(parse_envelope("not json at all").is_err());
    }
}
