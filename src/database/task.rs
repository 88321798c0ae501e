//! Task store: the root entity of one ReAct execution.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::postgres::PostgresPool;

/// Lifecycle status of a `ReactTask`. Terminal statuses are
/// append-only: once reached, no further recursion may mutate the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::WaitingInput => "waiting_input",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "waiting_input" => TaskStatus::WaitingInput,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A single agent task driven forward one recursion at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReactTask {
    pub task_id: Uuid,
    pub session_id: Uuid,
    pub agent_id: Uuid,
    pub user: String,
    pub user_message: String,
    pub objective: String,
    pub status: String,
    pub iteration: i32,
    pub max_iteration: i32,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ReactTaskStore {
    pool: PostgresPool,
}

impl ReactTaskStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        session_id: Uuid,
        agent_id: Uuid,
        user: &str,
        user_message: &str,
        objective: &str,
        max_iteration: i32,
    ) -> Result<ReactTask> {
        let task = sqlx::query_as::<_, ReactTask>(
            r#"
                INSERT INTO react_tasks (session_id, agent_id, "user", user_message, objective, status, max_iteration)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(agent_id)
        .bind(user)
        .bind(user_message)
        .bind(objective)
        .bind(TaskStatus::Pending.as_str())
        .bind(max_iteration)
        .fetch_one(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Option<ReactTask>> {
        let task = sqlx::query_as::<_, ReactTask>("SELECT * FROM react_tasks WHERE task_id = $1")
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    /// Advance `iteration` by one and stamp the new status, as happens once
    /// a recursion's result has been persisted.
    pub async fn advance(&self, task_id: Uuid, status: TaskStatus) -> Result<ReactTask> {
        let task = sqlx::query_as::<_, ReactTask>(
            r#"
                UPDATE react_tasks
                SET iteration = iteration + 1, status = $2, updated_at = NOW()
                WHERE task_id = $1
                RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn set_status(&self, task_id: Uuid, status: TaskStatus) -> Result<ReactTask> {
        let task = sqlx::query_as::<_, ReactTask>(
            r#"
                UPDATE react_tasks SET status = $2, updated_at = NOW()
                WHERE task_id = $1
                RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn accumulate_tokens(
        &self,
        task_id: Uuid,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Result<ReactTask> {
        let task = sqlx::query_as::<_, ReactTask>(
            r#"
                UPDATE react_tasks
                SET prompt_tokens = prompt_tokens + $2,
                completion_tokens = completion_tokens + $3,
                total_tokens = total_tokens + $2 + $3,
                updated_at = NOW()
                WHERE task_id = $1
                RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .fetch_one(&self.pool)
        .await?;

        Ok(task)
    }

    pub async fn get_by_session(&self, session_id: Uuid) -> Result<Vec<ReactTask>> {
        let tasks = sqlx::query_as::<_, ReactTask>(
            "SELECT * FROM react_tasks WHERE session_id = $1 ORDER BY created_at",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::WaitingInput,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::WaitingInput.is_terminal());
    }
}
