//! Tool registry row and the `AgentTool` allowlist link.
//!
//! This is the persisted catalog entry; `crate::tools::registry` owns the
//! in-process executable side (the `func`) that this row's `tool_name`
//! resolves to.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::postgres::PostgresPool;

/// A registered tool. `tool_name` is required to equal the tool's function
/// name and be a valid identifier, enforced in `validate_tool_name`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ToolRecord {
    pub tool_name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub execution_mode: String,
    pub created_at: DateTime<Utc>,
}

/// `name` must match `[A-Za-z_][A-Za-z0-9_]*`, length <= 100.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 100 {
        return Err(Error::Validation(format!(
                    "tool name must be 1-100 characters: {name}"
        )));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_alphabetic() || first == '_') {
        return Err(Error::Validation(format!(
                    "tool name must start with a letter or underscore: {name}"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Validation(format!(
                    "tool name must be a valid identifier: {name}"
        )));
    }
    Ok(())
}

pub struct ToolStore {
    pool: PostgresPool,
}

impl ToolStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn register(
        &self,
        tool_name: &str,
        description: &str,
        parameters_schema: Value,
        execution_mode: &str,
    ) -> Result<ToolRecord> {
        validate_tool_name(tool_name)?;

        let record = sqlx::query_as::<_, ToolRecord>(
            r#"
                INSERT INTO tools (tool_name, description, parameters_schema, execution_mode)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (tool_name) DO UPDATE SET
                description = EXCLUDED.description,
                parameters_schema = EXCLUDED.parameters_schema,
                execution_mode = EXCLUDED.execution_mode
                RETURNING *
            "#,
        )
        .bind(tool_name)
        .bind(description)
        .bind(parameters_schema)
        .bind(execution_mode)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn get(&self, tool_name: &str) -> Result<Option<ToolRecord>> {
        let record = sqlx::query_as::<_, ToolRecord>("SELECT * FROM tools WHERE tool_name = $1")
        .bind(tool_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<ToolRecord>> {
        let records = sqlx::query_as::<_, ToolRecord>("SELECT * FROM tools ORDER BY tool_name")
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

/// Many-to-many allowlist scoping which tools an agent may invoke. Treated
/// as authoritative at dispatch time: a tool call naming a tool not in this
/// set is rejected before execution, regardless of whether the tool itself
/// is registered.
pub struct AgentToolStore {
    pool: PostgresPool,
}

impl AgentToolStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn assign(&self, agent_id: Uuid, tool_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_tools (agent_id, tool_name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(agent_id)
        .bind(tool_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke(&self, agent_id: Uuid, tool_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_tools WHERE agent_id = $1 AND tool_name = $2")
        .bind(agent_id)
        .bind(tool_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn allowed_for(&self, agent_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT tool_name FROM agent_tools WHERE agent_id = $1 ORDER BY tool_name",
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    pub async fn is_allowed(&self, agent_id: Uuid, tool_name: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM agent_tools WHERE agent_id = $1 AND tool_name = $2",
        )
        .bind(agent_id)
        .bind(tool_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_identifiers() {
        assert!(validate_tool_name("add").is_ok());
        assert!(validate_tool_name("_private_tool").is_ok());
        assert!(validate_tool_name("search_web_v2").is_ok());
    }

    #[test]
    fn rejects_invalid_identifiers() {
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name("2fast").is_err());
        assert!(validate_tool_name("has-dash").is_err());
        assert!(validate_tool_name("has space").is_err());
        assert!(validate_tool_name(&"x".repeat(101)).is_err());
    }
}
