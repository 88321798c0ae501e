//! Core tool trait and result types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A tool invokable by the recursion engine. `name()` must satisfy
/// `crate::database::validate_tool_name`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> Result<ToolResult>;
}

/// Result of one tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        ToolResult {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata: None,
        }
    }

    pub fn success_with_metadata(content: impl Into<String>, metadata: Value) -> Self {
        ToolResult {
            success: true,
            content: Some(content.into()),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolResult {
            success: false,
            content: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn as_text(&self) -> String {
        if self.success {
            self.content.clone().unwrap_or_default()
        } else {
            format!("Error: {}", self.error.clone().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_as_text_prefixes_error() {
        let result = ToolResult::failure("boom");
        assert_eq!(result.as_text(), "Error: boom");
    }

    #[test]
    fn success_as_text_returns_content() {
        let result = ToolResult::success("42");
        assert_eq!(result.as_text(), "42");
    }
}
