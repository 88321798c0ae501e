//! Agent and LLM configuration stores.
//!
//! Both entities are created and updated by external CRUD; the engine only
//! ever reads them.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::postgres::PostgresPool;

/// An agent definition: which LLM it uses and how many recursions it is
/// allowed before the engine forces a stop.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Agent {
    pub agent_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub llm_id: Uuid,
    pub max_iteration: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire protocol an `LlmConfig` speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProtocolKind {
    OpenaiCompatible,
    AnthropicCompatible,
}

impl LlmProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProtocolKind::OpenaiCompatible => "openai_compatible",
            LlmProtocolKind::AnthropicCompatible => "anthropic_compatible",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "anthropic_compatible" => LlmProtocolKind::AnthropicCompatible,
            _ => LlmProtocolKind::OpenaiCompatible,
        }
    }
}

/// An LLM endpoint configuration, referenced by `Agent.llm_id` and by the
/// agent builder (C9). `api_key` is stored as plaintext at rest (column is
/// not logged or serialized back out over the wire; see `LlmConfig::redacted`).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LlmConfig {
    pub llm_id: Uuid,
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub protocol: String,
    pub streaming: bool,
    pub extra_config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LlmConfig {
    pub fn protocol_kind(&self) -> LlmProtocolKind {
        LlmProtocolKind::from_str(&self.protocol)
    }

    /// A copy safe to log or return over an external API: `api_key` masked.
    pub fn redacted(&self) -> LlmConfig {
        let mut copy = self.clone();
        copy.api_key = "****".to_string();
        copy
    }
}

pub struct AgentStore {
    pool: PostgresPool,
}

impl AgentStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        llm_id: Uuid,
        max_iteration: i32,
    ) -> Result<Agent> {
        let agent = sqlx::query_as::<_, Agent>(
            r#"
                INSERT INTO agents (name, description, llm_id, max_iteration)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(llm_id)
        .bind(max_iteration)
        .fetch_one(&self.pool)
        .await?;

        Ok(agent)
    }

    pub async fn get(&self, agent_id: Uuid) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE agent_id = $1")
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<Agent>> {
        let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE name = $1")
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(agent)
    }

    pub async fn list(&self) -> Result<Vec<Agent>> {
        let agents = sqlx::query_as::<_, Agent>("SELECT * FROM agents ORDER BY name")
        .fetch_all(&self.pool)
        .await?;
        Ok(agents)
    }
}

pub struct LlmConfigStore {
    pool: PostgresPool,
}

impl LlmConfigStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        endpoint: &str,
        model: &str,
        api_key: &str,
        protocol: LlmProtocolKind,
        streaming: bool,
        extra_config: Value,
    ) -> Result<LlmConfig> {
        let config = sqlx::query_as::<_, LlmConfig>(
            r#"
                INSERT INTO llm_configs (name, endpoint, model, api_key, protocol, streaming, extra_config)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            "#,
        )
        .bind(name)
        .bind(endpoint)
        .bind(model)
        .bind(api_key)
        .bind(protocol.as_str())
        .bind(streaming)
        .bind(extra_config)
        .fetch_one(&self.pool)
        .await?;

        Ok(config)
    }

    pub async fn get(&self, llm_id: Uuid) -> Result<Option<LlmConfig>> {
        let config = sqlx::query_as::<_, LlmConfig>("SELECT * FROM llm_configs WHERE llm_id = $1")
        .bind(llm_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_kind_round_trips() {
        assert_eq!(
            LlmProtocolKind::from_str(LlmProtocolKind::OpenaiCompatible.as_str()),
            LlmProtocolKind::OpenaiCompatible
        );
        assert_eq!(
            LlmProtocolKind::from_str(LlmProtocolKind::AnthropicCompatible.as_str()),
            LlmProtocolKind::AnthropicCompatible
        );
    }

    #[test]
    fn redacted_masks_api_key() {
        let config = LlmConfig {
            llm_id: Uuid::new_v4(),
            name: "gpt".to_string(),
            endpoint: "https://api.example.com".to_string(),
            model: "gpt-4".to_string(),
            api_key: "sk-secret".to_string(),
            protocol: "openai_compatible".to_string(),
            streaming: true,
            extra_config: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert_eq!(config.redacted().api_key, "****");
        assert_eq!(config.api_key, "sk-secret");
    }
}
