//! PostgreSQL connection pool and schema migrations.

use crate::config::DatabaseConfig;
use crate::error::Result;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// PostgreSQL connection pool type alias
pub type PostgresPool = PgPool;

/// Initialize the PostgreSQL connection pool
pub async fn init_pool(config: &DatabaseConfig) -> Result<PostgresPool> {
    info!("Initializing PostgreSQL connection pool");

    let pool = PgPoolOptions::new()
    .max_connections(config.max_connections)
    .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
    .connect(config.url.expose_secret())
    .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    info!("PostgreSQL connection pool initialized successfully");
    Ok(pool)
}

/// Initialize a pool for running migrations. Kept as a distinct entry point
/// so migration tooling can connect ahead of application-level checks.
pub async fn init_pool_for_migrations(config: &DatabaseConfig) -> Result<PostgresPool> {
    init_pool(config).await
}

/// Database migrations
pub mod migrations {
    use super::*;

    /// Run all migrations. Idempotent: safe to call on every boot.
    pub async fn run(pool: &PgPool) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS llm_configs (
                llm_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL UNIQUE,
                endpoint TEXT NOT NULL,
                model TEXT NOT NULL,
                api_key TEXT NOT NULL,
                protocol TEXT NOT NULL DEFAULT 'openai_compatible',
                streaming BOOLEAN NOT NULL DEFAULT true,
                extra_config JSONB NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS agents (
                agent_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                llm_id UUID NOT NULL REFERENCES llm_configs(llm_id),
                max_iteration INTEGER NOT NULL DEFAULT 30,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS tools (
                tool_name TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                parameters_schema JSONB NOT NULL DEFAULT '{}',
                execution_mode TEXT NOT NULL DEFAULT 'local',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS agent_tools (
                agent_id UUID NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
                tool_name TEXT NOT NULL REFERENCES tools(tool_name) ON DELETE CASCADE,
                PRIMARY KEY (agent_id, tool_name)
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS sessions (
                session_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                agent_id UUID NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                subject TEXT,
                object TEXT,
                chat_history JSONB NOT NULL DEFAULT '[]',
                chat_history_version INTEGER NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS session_memory (
                session_id UUID PRIMARY KEY REFERENCES sessions(session_id) ON DELETE CASCADE,
                memory_items JSONB NOT NULL DEFAULT '[]',
                conversations JSONB NOT NULL DEFAULT '[]',
                next_item_id BIGINT NOT NULL DEFAULT 1,
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS react_tasks (
                task_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                session_id UUID NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                agent_id UUID NOT NULL REFERENCES agents(agent_id) ON DELETE CASCADE,
                "user" TEXT NOT NULL,
                user_message TEXT NOT NULL,
                objective TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                iteration INTEGER NOT NULL DEFAULT 0,
                max_iteration INTEGER NOT NULL DEFAULT 30,
                prompt_tokens BIGINT NOT NULL DEFAULT 0,
                completion_tokens BIGINT NOT NULL DEFAULT 0,
                total_tokens BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS react_plan_steps (
                task_id UUID NOT NULL REFERENCES react_tasks(task_id) ON DELETE CASCADE,
                step_id TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (task_id, step_id)
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS react_recursions (
                trace_id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                task_id UUID NOT NULL REFERENCES react_tasks(task_id) ON DELETE CASCADE,
                plan_step_id TEXT,
                iteration_index INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'running',
                observe TEXT NOT NULL DEFAULT '',
                thought TEXT NOT NULL DEFAULT '',
                action_type TEXT,
                action_output JSONB NOT NULL DEFAULT '{}',
                tool_call_results JSONB,
                error_log TEXT,
                prompt_tokens BIGINT NOT NULL DEFAULT 0,
                completion_tokens BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                FOREIGN KEY (task_id, plan_step_id) REFERENCES react_plan_steps(task_id, step_id)
                )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_react_recursions_task_id ON react_recursions(task_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_react_plan_steps_task_id ON react_plan_steps(task_id)",
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)")
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_react_tasks_session_id ON react_tasks(session_id)",
        )
        .execute(pool)
        .await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Database tests require a live Postgres instance; exercised in integration tests.
}
