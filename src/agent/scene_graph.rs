//! Scene-Graph Chat Runtime (C8) — a peer of the recursion engine used by
//! the "preview chat" and "build" features.
//!
//! Speaks a simpler protocol than C3/C5: the model streams plain text with
//! Markdown section headers (`## Reason`, `## Response`, `## Updated
//! Scenes`, `## Matched Connection`) instead of a JSON envelope. This
//! runtime splits the stream on those headers and parses fenced JSON out of
//! the latter two sections.

use std::collections::HashMap;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

use super::types::{GenerationOptions, Message};
use super::LlmClient;

/// How far back from the end of the unconsumed buffer we refuse to emit,
/// in case a section header is arriving split across chunks.
const LOOKAHEAD: usize = 50;

const HEADERS: &[(&str, Section)] = &[
    ("## Reason", Section::Reason),
    ("## Response", Section::Response),
    ("## Updated Scenes", Section::UpdatedScenes),
    ("## Matched Connection", Section::MatchedConnection),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Reason,
    Response,
    UpdatedScenes,
    MatchedConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneEventType {
    Reason,
    Response,
    UpdatedScenes,
    MatchedConnection,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneEvent {
    #[serde(rename = "type")]
    pub event_type: SceneEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: String,
}

impl SceneEvent {
    fn delta(event_type: SceneEventType, delta: String) -> Self {
        SceneEvent {
            event_type,
            delta: Some(delta),
            data: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn data(event_type: SceneEventType, data: Value) -> Self {
        SceneEvent {
            event_type,
            delta: None,
            data: Some(data),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One mutation to apply to a scene (or one of its subscenes).
#[derive(Debug, Clone, Deserialize)]
pub struct SceneUpdate {
    pub scene_name: String,
    #[serde(default)]
    pub subscene_name: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

/// A transition the model decided matches the current conversation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchedConnection {
    pub from_scene: String,
    pub to_scene: String,
    #[serde(default)]
    pub condition: Option<String>,
}

/// In-memory scene/subscene state, keyed by scene name then, for
/// subscenes, `"scene/subscene"`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SceneGraph {
    scenes: HashMap<String, serde_json::Map<String, Value>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, updates: &[SceneUpdate]) {
        for update in updates {
            let key = match &update.subscene_name {
                Some(sub) => format!("{}/{sub}", update.scene_name),
                None => update.scene_name.clone(),
            };
            let entry = self.scenes.entry(key).or_default();
            for (field, value) in &update.fields {
                entry.insert(field.clone(), value.clone());
            }
        }
    }

    pub fn snapshot(&self) -> Value {
        serde_json::to_value(&self.scenes).unwrap_or(Value::Null)
    }
}

/// Request body for `POST /preview/chat/stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct PreviewChatRequest {
    pub agent_detail: Value,
    pub message: String,
    #[serde(default)]
    pub current_scene_name: Option<String>,
    #[serde(default)]
    pub current_subscene_name: Option<String>,
}

fn system_prompt(req: &PreviewChatRequest) -> String {
    format!(
        "You are a scene-graph driven conversational agent.\n\
        Agent detail: {}\n\
        Current scene: {}\n\
        Current subscene: {}\n\n\
        Respond using exactly these Markdown sections, in this order:\n\
        ## Reason\n<why you are responding this way>\n\
        ## Response\n<the reply shown to the user>\n\
        ## Updated Scenes\n```json\n[{{\"scene_name\": \"...\", \"subscene_name\": null, \"fields\": {{}}}}]\n```\n\
        ## Matched Connection\n```json\n{{\"from_scene\": \"...\", \"to_scene\": \"...\", \"condition\": null}}\n```",
        req.agent_detail,
        req.current_scene_name.as_deref().unwrap_or("none"),
        req.current_subscene_name.as_deref().unwrap_or("none"),
    )
}

/// Run one preview-chat turn: stream the model's sectioned reply, forward
/// `reason`/`response` text live, and emit one consolidated
/// `updated_scenes` event (and a `matched_connection` event, if present)
/// once the stream ends.
pub async fn run_preview_chat(
    llm: &LlmClient,
    req: PreviewChatRequest,
    events: UnboundedSender<SceneEvent>,
) -> Result<()> {
    let messages = vec![Message::system(system_prompt(&req)), Message::user(req.message.clone())];

    let mut stream = llm.chat_stream(&messages, &GenerationOptions::default()).await?;

    let mut buf = String::new();
    let mut section = Section::None;
    let mut updated_scenes_body = String::new();
    let mut matched_connection_body = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(err) => {
                let _ = events.send(SceneEvent::data(
                        SceneEventType::Error,
                        serde_json::json!({ "message": err.to_string() }),
                ));
                return Err(err);
            }
        };
        if let Some(text) = chunk.delta_content {
            buf.push_str(&text);
            drain(
                &mut buf,
                &mut section,
                &mut updated_scenes_body,
                &mut matched_connection_body,
                &events,
                false,
            );
        }
    }

    drain(
        &mut buf,
        &mut section,
        &mut updated_scenes_body,
        &mut matched_connection_body,
        &events,
        true,
    );

    let mut graph = SceneGraph::new();
    if let Some(updates) = parse_scene_updates(&updated_scenes_body) {
        graph.apply(&updates);
    }
    let _ = events.send(SceneEvent::data(SceneEventType::UpdatedScenes, graph.snapshot()));

    if let Some(connection) = parse_matched_connection(&matched_connection_body) {
        let _ = events.send(SceneEvent::data(
                SceneEventType::MatchedConnection,
                serde_json::to_value(connection)?,
        ));
    }

    Ok(())
}

/// Consume as much of `buf` as is safe: switch sections on header match,
/// otherwise flush everything except the trailing lookahead window, unless
/// that window itself contains a `#` (a header might be forming).
#[allow(clippy::too_many_arguments)]
fn drain(
    buf: &mut String,
    section: &mut Section,
    updated_scenes_body: &mut String,
    matched_connection_body: &mut String,
    events: &UnboundedSender<SceneEvent>,
    at_end: bool,
) {
    loop {
        let scan = buf.trim_start_matches(['\n', '\r']);
        let leading_ws = buf.len() - scan.len();

        if let Some((header, next_section)) = HEADERS.iter().find(|(h, _)| scan.starts_with(h)) {
            buf.drain(..leading_ws + header.len());
            if buf.starts_with('\n') {
                buf.remove(0);
            }
            *section = *next_section;
            continue;
        }

        if at_end {
            if !buf.is_empty() {
                let text = std::mem::take(buf);
                emit_body(*section, text, updated_scenes_body, matched_connection_body, events);
            }
            break;
        }

        if buf.len() <= LOOKAHEAD {
            break;
        }

        let danger_start = buf.len() - LOOKAHEAD;
        if buf[danger_start..].contains('#') {
            break;
        }

        let text: String = buf.drain(..danger_start).collect();
        emit_body(*section, text, updated_scenes_body, matched_connection_body, events);
    }
}

fn emit_body(
    section: Section,
    text: String,
    updated_scenes_body: &mut String,
    matched_connection_body: &mut String,
    events: &UnboundedSender<SceneEvent>,
) {
    match section {
        Section::None => {}
        Section::Reason => {
            let _ = events.send(SceneEvent::delta(SceneEventType::Reason, text));
        }
        Section::Response => {
            let _ = events.send(SceneEvent::delta(SceneEventType::Response, text));
        }
        Section::UpdatedScenes => updated_scenes_body.push_str(&text),
        Section::MatchedConnection => matched_connection_body.push_str(&text),
    }
}

fn parse_scene_updates(text: &str) -> Option<Vec<SceneUpdate>> {
    let json_text = extract_json(text)?;
    serde_json::from_str(&json_text).ok()
}

fn parse_matched_connection(text: &str) -> Option<MatchedConnection> {
    let json_text = extract_json(text)?;
    serde_json::from_str(&json_text).ok()
}

/// Pull JSON out of a ```json / ``` fenced block if present, else treat the
/// whole trimmed text as the JSON payload.
fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
        let end = after_fence.find("```")?;
        return Some(after_fence[..end].trim().to_string());
    }

    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn scene_graph_apply_merges_fields() {
        let mut graph = SceneGraph::new();
        graph.apply(&[SceneUpdate {
                    scene_name: "intro".to_string(),
                    subscene_name: None,
                    fields: serde_json::json!({"visited": true}).as_object().unwrap().clone(),
        }]);
        let snapshot = graph.snapshot();
        assert_eq!(snapshot["intro"]["visited"], true);
    }

    #[test]
    fn scene_graph_keys_subscenes_separately() {
        let mut graph = SceneGraph::new();
        graph.apply(&[SceneUpdate {
                    scene_name: "intro".to_string(),
                    subscene_name: Some("hallway".to_string()),
                    fields: serde_json::json!({"locked": false}).as_object().unwrap().clone(),
        }]);
        let snapshot = graph.snapshot();
        assert_eq!(snapshot["intro/hallway"]["locked"], false);
    }

    #[test]
    fn extract_json_reads_fenced_block() {
        let text = "prose\n```json\n{\"a\":1}\n```\ntrailing";
        assert_eq!(extract_json(text).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn extract_json_falls_back_to_raw_text() {
        assert_eq!(extract_json("{\"a\":1}").unwrap(), "{\"a\":1}");
    }

    #[test]
    fn drain_switches_section_on_header() {
        let mut buf = "## Response\nhello".to_string();
        let mut section = Section::None;
        let mut updated = String::new();
        let mut matched = String::new();
        let (tx, mut rx) = unbounded_channel();
        drain(&mut buf, &mut section, &mut updated, &mut matched, &tx, true);
        assert_eq!(section, Section::Response);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, SceneEventType::Response);
        assert_eq!(event.delta.as_deref(), Some("hello"));
    }

    #[test]
    fn drain_withholds_danger_zone_containing_hash() {
        let mut buf = "a".repeat(60) + "#";
        let mut section = Section::Response;
        let mut updated = String::new();
        let mut matched = String::new();
        let (tx, mut rx) = unbounded_channel();
        drain(&mut buf, &mut section, &mut updated, &mut matched, &tx, false);
        assert!(rx.try_recv().is_err());
        assert!(!buf.is_empty());
    }
}
