//! Shared application state: every store plus the tool registry/executor,
//! constructed once at boot and cloned (via `Arc`) into every handler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::{AgentBuilder, LlmClient};
use crate::config::Config;
use crate::database::{
    init_pool, migrations, AgentStore, AgentToolStore, LlmConfigStore, PostgresPool,
    ReactPlanStepStore, ReactRecursionStore, ReactTaskStore, SessionMemoryStore, SessionStore,
    ToolStore,
};
use crate::error::Result;
use crate::tools::{builtin_registry, ToolExecutor, ToolRegistry};

pub struct AppState {
    pub config: Config,
    pub pool: PostgresPool,
    pub agent_store: AgentStore,
    pub llm_config_store: LlmConfigStore,
    pub session_store: SessionStore,
    pub session_memory_store: SessionMemoryStore,
    pub task_store: ReactTaskStore,
    pub recursion_store: ReactRecursionStore,
    pub plan_store: ReactPlanStepStore,
    pub tool_store: ToolStore,
    pub agent_tool_store: AgentToolStore,
    pub tool_registry: Arc<ToolRegistry>,
    pub tool_executor: Arc<ToolExecutor>,
    /// Rolling builder conversations (C9), keyed by `session_id`; an
    /// in-process cache only, not persisted.
    pub builder_sessions: Mutex<HashMap<Uuid, (Uuid, AgentBuilder)>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let pool = init_pool(&config.database).await?;
        migrations::run(&pool).await?;

        let tool_registry = Arc::new(builtin_registry()?);
        let tool_executor = Arc::new(match config.sidecar.mode {
                crate::config::ToolExecutionMode::Local => {
                    ToolExecutor::local(tool_registry.clone(), config.sidecar.clone())
                }
                crate::config::ToolExecutionMode::PodmanSidecar => {
                    ToolExecutor::connect(tool_registry.clone(), config.sidecar.clone()).await?
                }
        });

        Ok(AppState {
                agent_store: AgentStore::new(pool.clone()),
                llm_config_store: LlmConfigStore::new(pool.clone()),
                session_store: SessionStore::new(pool.clone()),
                session_memory_store: SessionMemoryStore::new(pool.clone()),
                task_store: ReactTaskStore::new(pool.clone()),
                recursion_store: ReactRecursionStore::new(pool.clone()),
                plan_store: ReactPlanStepStore::new(pool.clone()),
                tool_store: ToolStore::new(pool.clone()),
                agent_tool_store: AgentToolStore::new(pool.clone()),
                tool_registry,
                tool_executor,
                builder_sessions: Mutex::new(HashMap::new()),
                pool,
                config,
        })
    }

    /// Build the LLM client configured for `llm_id`, resolving its protocol
    /// and endpoint from the stored `LlmConfig`.
    pub async fn llm_client_for(&self, llm_id: uuid::Uuid) -> Result<LlmClient> {
        let config = self
        .llm_config_store
        .get(llm_id)
        .await?
        .ok_or_else(|| crate::Error::NotFound(format!("llm config {llm_id}")))?;

        let api_key = secrecy::SecretString::from(config.api_key.clone());
        LlmClient::new(
            config.endpoint.clone(),
            config.model.clone(),
            &api_key,
            match config.protocol_kind() {
                crate::database::LlmProtocolKind::OpenaiCompatible => {
                    crate::agent::LlmProtocol::OpenaiCompatible
                }
                crate::database::LlmProtocolKind::AnthropicCompatible => {
                    crate::agent::LlmProtocol::AnthropicCompatible
                }
            },
            self.config.llm_defaults.timeout,
        )
    }
}
