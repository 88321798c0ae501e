//! Error types for the agent runtime

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Result type alias using the runtime's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Docker/container sidecar error
    #[error("Container error: {0}")]
    Container(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error
    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    /// 401: bad or expired JWT
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// 403: JWT subject doesn't match the resource's owning user
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// 404: missing session/task/agent/tool
    #[error("Not found: {0}")]
    NotFound(String),

    /// 400: malformed request body or unknown tool names in assignment
    #[error("Validation error: {0}")]
    Validation(String),

    /// 409: a tool with this name is already registered
    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    /// Upstream LLM failure: HTTP >=400, timeout, malformed JSON
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool invocation failure (local exception, sidecar non-zero exit,
    /// container spawn failure, bad JSON). Recorded in `tool_call_results`,
    /// never aborts the task.
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// JSON envelope unparseable after all fallbacks
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client disconnected; task moves to `cancelled`, no error event
    #[error("Cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is plausibly transient and could succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Database(_) | Error::Llm(_))
    }

    /// Whether the failure is the caller's fault rather than the server's
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::NotFound(_) | Error::Auth(_) | Error::Forbidden(_) | Error::DuplicateName(_)
        )
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}

/// Status-code mapping for the HTTP surface.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::DuplicateName(_) => StatusCode::CONFLICT,
            Error::Cancelled => StatusCode::BAD_REQUEST,
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Llm("timeout".into()).is_retryable());
        assert!(!Error::Validation("bad body".into()).is_retryable());
    }

    #[test]
    fn client_error_classification() {
        assert!(Error::NotFound("task".into()).is_client_error());
        assert!(!Error::Internal("oops".into()).is_client_error());
    }
}
