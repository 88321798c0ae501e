//! SSE event envelope emitted by the recursion engine.
//!
//! The engine never writes to a socket itself; it sends `EngineEvent`s down
//! an mpsc channel and the HTTP layer forwards each one verbatim as one SSE
//! `data:` line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One SSE event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RecursionStart,
    Observe,
    Thought,
    Abstract,
    Action,
    ToolCall,
    PlanUpdate,
    Answer,
    Error,
    TaskComplete,
}

/// `{type, task_id, trace_id?, iteration, delta?, data?, timestamp, tokens?, total_tokens?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub task_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Uuid>,
    pub iteration: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<i64>,
}

impl EngineEvent {
    pub fn new(event_type: EventType, task_id: Uuid, iteration: i32) -> Self {
        EngineEvent {
            event_type,
            task_id,
            trace_id: None,
            iteration,
            delta: None,
            data: None,
            timestamp: Utc::now(),
            tokens: None,
            total_tokens: None,
        }
    }

    pub fn with_trace(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_delta(mut self, delta: impl Into<String>) -> Self {
        self.delta = Some(delta.into());
        self
    }

    pub fn with_tokens(mut self, tokens: i64, total_tokens: i64) -> Self {
        self.tokens = Some(tokens);
        self.total_tokens = Some(total_tokens);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_field_and_omits_absent_optionals() {
        let event = EngineEvent::new(EventType::Observe, Uuid::new_v4(), 0);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], serde_json::json!("observe"));
        assert!(json.get("trace_id").is_none());
        assert!(json.get("delta").is_none());
    }

    #[test]
    fn builder_methods_populate_optional_fields() {
        let task_id = Uuid::new_v4();
        let trace_id = Uuid::new_v4();
        let event = EngineEvent::new(EventType::ToolCall, task_id, 2)
        .with_trace(trace_id)
        .with_data(serde_json::json!({"tool_calls": []}))
        .with_tokens(10, 42);
        assert_eq!(event.trace_id, Some(trace_id));
        assert_eq!(event.tokens, Some(10));
        assert_eq!(event.total_tokens, Some(42));
    }
}
