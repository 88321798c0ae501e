//! Wire-level and common types for the LLM abstraction (C3).
//!
//! `Message`/`Response` are the protocol-agnostic shapes the rest of the
//! engine works with; `protocol` holds the per-binding request/response
//! structs that get translated into and out of them.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A call to a named function with JSON arguments, as carried on an
/// assistant message or synthesized by the tool dispatch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Either an object or a JSON-encoded string
    pub arguments: serde_json::Value,
}

/// A message on the wire, protocol-agnostic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: Some(content.into()),
            reasoning_content: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Token usage, required on every call.
/// Missing `usage` on a streaming final chunk is logged as a warning and
/// treated as all-zero, never silently omitted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    #[serde(other)]
    Null,
}

/// A single completion choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseChoice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: Option<FinishReason>,
}

/// The common response shape every protocol binding adapts into
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub created: i64,
    pub choices: Vec<ResponseChoice>,
    pub usage: Usage,
}

impl Response {
    /// Content of the first choice, if any
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first()?.message.content.as_deref()
    }
}

/// One chunk of a streamed response
#[derive(Debug, Clone, Default)]
pub struct ResponseChunk {
    pub delta_content: Option<String>,
    pub delta_reasoning: Option<String>,
    pub finish_reason: Option<FinishReason>,
    /// Present only on the final chunk, if the provider sent it
    pub usage: Option<Usage>,
}

/// Generation options for a chat call
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl GenerationOptions {
    /// Deterministic decoding, used for the recursion engine's single-step calls
    pub fn precise() -> Self {
        GenerationOptions {
            temperature: Some(0.0),
            ..Default::default()
        }
    }
}

/// Wire protocol the configured `LlmConfig` speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProtocol {
    OpenaiCompatible,
    AnthropicCompatible,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert_eq!(Message::system("x").role, Role::System);
        assert_eq!(Message::user("x").role, Role::User);
        assert_eq!(Message::assistant("x").role, Role::Assistant);
        assert_eq!(Message::tool("id", "x").tool_call_id.unwrap(), "id");
    }

    #[test]
    fn response_first_content() {
        let resp = Response {
            id: "1".into(),
            model: "m".into(),
            created: 0,
            choices: vec![ResponseChoice {
                    index: 0,
                    message: Message::assistant("hello"),
                    finish_reason: Some(FinishReason::Stop),
            }],
            usage: Usage::default(),
        };
        assert_eq!(resp.first_content(), Some("hello"));
    }
}
