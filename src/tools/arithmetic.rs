//! Built-in arithmetic tools, the minimal example tools that ship with
//! every installation.

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{Tool, ToolResult};
use crate::error::{Error, Result};

fn number_arg(args: &Value, name: &str) -> Result<f64> {
    args.get(name)
    .and_then(|v| v.as_f64())
    .ok_or_else(|| Error::Validation(format!("missing or non-numeric '{name}' argument")))
}

pub struct AddTool;

#[async_trait]
impl Tool for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers together"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;
        Ok(ToolResult::success((a + b).to_string()))
    }
}

pub struct MultiplyTool;

#[async_trait]
impl Tool for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two numbers together"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number" }
                },
                "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;
        Ok(ToolResult::success((a * b).to_string()))
    }
}

pub struct DivideTool;

#[async_trait]
impl Tool for DivideTool {
    fn name(&self) -> &str {
        "divide"
    }

    fn description(&self) -> &str {
        "Divide the first number by the second"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
                "type": "object",
                "properties": {
                    "a": { "type": "number" },
                    "b": { "type": "number", "description": "must be non-zero" }
                },
                "required": ["a", "b"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let a = number_arg(&args, "a")?;
        let b = number_arg(&args, "b")?;
        if b == 0.0 {
            return Ok(ToolResult::failure("division by zero"));
        }
        Ok(ToolResult::success((a / b).to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_two_numbers() {
        let result = AddTool.execute(serde_json::json!({"a": 7, "b": 9})).await.unwrap();
        assert_eq!(result.content.as_deref(), Some("16"));
    }

    #[tokio::test]
    async fn multiplies_two_numbers() {
        let result = MultiplyTool
        .execute(serde_json::json!({"a": 6, "b": 7}))
        .await
        .unwrap();
        assert_eq!(result.content.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn divide_by_zero_is_a_tool_failure_not_an_error() {
        let result = DivideTool
        .execute(serde_json::json!({"a": 1, "b": 0}))
        .await
        .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn missing_argument_is_validation_error() {
        let err = AddTool.execute(serde_json::json!({"a": 1})).await;
        assert!(err.is_err());
    }
}
