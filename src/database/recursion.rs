//! Recursion and plan-step stores.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::postgres::PostgresPool;

/// Terminal/non-terminal status of one recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecursionStatus {
    Running,
    Done,
    Error,
}

impl RecursionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecursionStatus::Running => "running",
            RecursionStatus::Done => "done",
            RecursionStatus::Error => "error",
        }
    }
}

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl PlanStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStepStatus::Pending => "pending",
            PlanStepStatus::Running => "running",
            PlanStepStatus::Done => "done",
            PlanStepStatus::Error => "error",
        }
    }
}

/// One step of the current plan. At most one plan exists per task at a
/// time; `RE_PLAN` replaces the whole set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReactPlanStep {
    pub task_id: Uuid,
    pub step_id: String,
    pub description: String,
    pub status: String,
}

/// One iteration of the recursion engine against a task. `iteration_index`
/// values for a task form `0,1,2,…` with no gaps up to `task.iteration`;
/// at most one recursion per task is non-terminal at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReactRecursion {
    pub trace_id: Uuid,
    pub task_id: Uuid,
    pub plan_step_id: Option<String>,
    pub iteration_index: i32,
    pub observe: String,
    pub thought: String,
    pub action_type: Option<String>,
    pub action_output: Value,
    pub tool_call_results: Option<Value>,
    pub status: String,
    pub error_log: Option<String>,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Complete JSON snapshot of the state machine as fed to the LLM for one
/// recursion, keyed 1:1 by `trace_id`. Exists so a recursion can be
/// replayed or inspected without reconstructing it from its siblings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactRecursionState {
    pub trace_id: Uuid,
    pub state_json: Value,
}

pub struct ReactPlanStepStore {
    pool: PostgresPool,
}

impl ReactPlanStepStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    /// Replace the whole plan for `task_id` with `steps`, as `RE_PLAN` requires.
    pub async fn replace_plan(
        &self,
        task_id: Uuid,
        steps: &[(String, String)],
    ) -> Result<Vec<ReactPlanStep>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM react_plan_steps WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(steps.len());
        for (step_id, description) in steps {
            let step = sqlx::query_as::<_, ReactPlanStep>(
                r#"
                    INSERT INTO react_plan_steps (task_id, step_id, description, status)
                    VALUES ($1, $2, $3, $4)
                    RETURNING task_id, step_id, description, status
                "#,
            )
            .bind(task_id)
            .bind(step_id)
            .bind(description)
            .bind(PlanStepStatus::Pending.as_str())
            .fetch_one(&mut *tx)
            .await?;
            created.push(step);
        }

        tx.commit().await?;
        Ok(created)
    }

    pub async fn get_by_task(&self, task_id: Uuid) -> Result<Vec<ReactPlanStep>> {
        let steps = sqlx::query_as::<_, ReactPlanStep>(
            "SELECT task_id, step_id, description, status FROM react_plan_steps WHERE task_id = $1 ORDER BY step_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(steps)
    }

    pub async fn set_status(
        &self,
        task_id: Uuid,
        step_id: &str,
        status: PlanStepStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE react_plan_steps SET status = $3 WHERE task_id = $1 AND step_id = $2")
        .bind(task_id)
        .bind(step_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct ReactRecursionStore {
    pool: PostgresPool,
}

impl ReactRecursionStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn start(
        &self,
        task_id: Uuid,
        iteration_index: i32,
        plan_step_id: Option<&str>,
    ) -> Result<ReactRecursion> {
        let recursion = sqlx::query_as::<_, ReactRecursion>(
            r#"
                INSERT INTO react_recursions (task_id, plan_step_id, iteration_index, status)
                VALUES ($1, $2, $3, $4)
                RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(plan_step_id)
        .bind(iteration_index)
        .bind(RecursionStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(recursion)
    }

    /// Persist the LLM's decoded envelope plus any tool results, and close
    /// out the recursion's status in one update.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        trace_id: Uuid,
        observe: &str,
        thought: &str,
        action_type: &str,
        action_output: &Value,
        tool_call_results: Option<&Value>,
        status: RecursionStatus,
        error_log: Option<&str>,
        prompt_tokens: i64,
        completion_tokens: i64,
    ) -> Result<ReactRecursion> {
        let recursion = sqlx::query_as::<_, ReactRecursion>(
            r#"
                UPDATE react_recursions
                SET observe = $2, thought = $3, action_type = $4, action_output = $5,
                tool_call_results = $6, status = $7, error_log = $8,
                prompt_tokens = $9, completion_tokens = $10, updated_at = NOW()
                WHERE trace_id = $1
                RETURNING *
            "#,
        )
        .bind(trace_id)
        .bind(observe)
        .bind(thought)
        .bind(action_type)
        .bind(action_output)
        .bind(tool_call_results)
        .bind(status.as_str())
        .bind(error_log)
        .bind(prompt_tokens)
        .bind(completion_tokens)
        .fetch_one(&self.pool)
        .await?;

        Ok(recursion)
    }

    pub async fn get(&self, trace_id: Uuid) -> Result<Option<ReactRecursion>> {
        let recursion =
        sqlx::query_as::<_, ReactRecursion>("SELECT * FROM react_recursions WHERE trace_id = $1")
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(recursion)
    }

    pub async fn get_by_task(&self, task_id: Uuid) -> Result<Vec<ReactRecursion>> {
        let recursions = sqlx::query_as::<_, ReactRecursion>(
            "SELECT * FROM react_recursions WHERE task_id = $1 ORDER BY iteration_index",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(recursions)
    }

    /// Most recent recursion of `task_id` by `iteration_index`, if any.
    pub async fn get_latest(&self, task_id: Uuid) -> Result<Option<ReactRecursion>> {
        let recursion = sqlx::query_as::<_, ReactRecursion>(
            "SELECT * FROM react_recursions WHERE task_id = $1 ORDER BY iteration_index DESC LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(recursion)
    }

    /// Resume a `CLARIFY` recursion by writing the user's reply into
    /// `action_output.reply`.
    pub async fn set_clarify_reply(&self, trace_id: Uuid, reply: &str) -> Result<ReactRecursion> {
        let recursion = sqlx::query_as::<_, ReactRecursion>(
            r#"
                UPDATE react_recursions
                SET action_output = jsonb_set(coalesce(action_output, '{}'::jsonb), '{reply}', to_jsonb($2::text)),
                updated_at = NOW()
                WHERE trace_id = $1
                RETURNING *
            "#,
        )
        .bind(trace_id)
        .bind(reply)
        .fetch_one(&self.pool)
        .await?;
        Ok(recursion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recursion_status_strings() {
        assert_eq!(RecursionStatus::Running.as_str(), "running");
        assert_eq!(RecursionStatus::Done.as_str(), "done");
        assert_eq!(RecursionStatus::Error.as_str(), "error");
    }

    #[test]
    fn plan_step_status_strings() {
        assert_eq!(PlanStepStatus::Pending.as_str(), "pending");
        assert_eq!(PlanStepStatus::Running.as_str(), "running");
        assert_eq!(PlanStepStatus::Done.as_str(), "done");
        assert_eq!(PlanStepStatus::Error.as_str(), "error");
    }
}
