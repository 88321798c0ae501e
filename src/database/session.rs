//! Session and SessionMemory stores.
//!
//! A Session exclusively owns its SessionMemory; this module is the only
//! writer of either, and every write bumps `updated_at`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use super::postgres::PostgresPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    WaitingInput,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::WaitingInput => "waiting_input",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "waiting_input" => SessionStatus::WaitingInput,
            "closed" => SessionStatus::Closed,
            _ => SessionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub agent_id: Uuid,
    pub user_id: String,
    pub status: String,
    pub subject: Option<String>,
    pub object: Option<String>,
    pub chat_history: Value,
    pub chat_history_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One memory item's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryItemType {
    Background,
    Preference,
    Constraint,
    Capability,
    Decision,
}

/// Extra fields carried only by `decision`-type items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionDetails {
    pub source: String,
    pub decision: String,
    pub rationale: String,
    pub reversible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: i64,
    #[serde(rename = "type")]
    pub item_type: MemoryItemType,
    pub content: String,
    pub confidence: f64,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionDetails>,
}

/// A single incoming memory mutation.
#[derive(Debug, Clone)]
pub enum MemoryDelta {
    Upsert {
        id: Option<i64>,
        item_type: MemoryItemType,
        content: String,
        confidence: f64,
        decision: Option<DecisionDetails>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMemory {
    pub session_id: Uuid,
    pub memory_items: Vec<MemoryItem>,
    pub conversations: Vec<Value>,
    pub version: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SessionMemoryRow {
    session_id: Uuid,
    memory_items: Value,
    conversations: Value,
    next_item_id: i64,
    version: i32,
    updated_at: DateTime<Utc>,
}

impl SessionMemoryRow {
    fn into_memory(self) -> Result<SessionMemory> {
        Ok(SessionMemory {
                session_id: self.session_id,
                memory_items: serde_json::from_value(self.memory_items)?,
                conversations: serde_json::from_value(self.conversations)?,
                version: self.version,
                updated_at: self.updated_at,
        })
    }
}

pub struct SessionStore {
    pool: PostgresPool,
}

impl SessionStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, agent_id: Uuid, user_id: &str) -> Result<Session> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, Session>(
            r#"
                INSERT INTO sessions (agent_id, user_id, status, chat_history)
                VALUES ($1, $2, $3, '[]'::jsonb)
                RETURNING *
            "#,
        )
        .bind(agent_id)
        .bind(user_id)
        .bind(SessionStatus::Active.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO session_memory (session_id, memory_items, conversations) VALUES ($1, '[]'::jsonb, '[]'::jsonb)",
        )
        .bind(session.session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(session)
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE session_id = $1")
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            "SELECT * FROM sessions WHERE user_id = $1 ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    pub async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            "UPDATE sessions SET status = $2, updated_at = NOW() WHERE session_id = $1 RETURNING *",
        )
        .bind(session_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    pub async fn update_chat_history(&self, session_id: Uuid, chat_history: Value) -> Result<Session> {
        let session = sqlx::query_as::<_, Session>(
            r#"
                UPDATE sessions
                SET chat_history = $2, chat_history_version = chat_history_version + 1, updated_at = NOW()
                WHERE session_id = $1
                RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(chat_history)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Cascades to `session_memory`, `react_tasks` and their recursions/plan
    /// steps via `ON DELETE CASCADE`.
    pub async fn delete(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = $1")
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SessionMemoryStore {
    pool: PostgresPool,
}

impl SessionMemoryStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, session_id: Uuid) -> Result<Option<SessionMemory>> {
        let row = sqlx::query_as::<_, SessionMemoryRow>(
            "SELECT * FROM session_memory WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionMemoryRow::into_memory).transpose()
    }

    /// Apply a batch of deltas atomically: upserts assign a monotonic id
    /// when none is given, otherwise replace the item with that id in
    /// place; deletes remove by id. Unknown delete ids are a no-op.
    pub async fn apply_memory_delta(
        &self,
        session_id: Uuid,
        deltas: Vec<MemoryDelta>,
    ) -> Result<SessionMemory> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SessionMemoryRow>(
            "SELECT * FROM session_memory WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session memory {session_id}")))?;

        let mut items: Vec<MemoryItem> = serde_json::from_value(row.memory_items)?;
        let mut next_item_id = row.next_item_id;

        for delta in deltas {
            match delta {
                MemoryDelta::Upsert {
                    id,
                    item_type,
                    content,
                    confidence,
                    decision,
                } => {
                    let confidence = confidence.clamp(0.0, 1.0);
                    match id {
                        Some(existing_id) => {
                            if let Some(item) = items.iter_mut().find(|i| i.id == existing_id) {
                                item.item_type = item_type;
                                item.content = content;
                                item.confidence = confidence;
                                item.decision = decision;
                            } else {
                                items.push(MemoryItem {
                                        id: existing_id,
                                        item_type,
                                        content,
                                        confidence,
                                        decision,
                                });
                                next_item_id = next_item_id.max(existing_id + 1);
                            }
                        }
                        None => {
                            let id = next_item_id;
                            next_item_id += 1;
                            items.push(MemoryItem {
                                    id,
                                    item_type,
                                    content,
                                    confidence,
                                    decision,
                            });
                        }
                    }
                }
                MemoryDelta::Delete { id } => {
                    items.retain(|i| i.id != id);
                }
            }
        }

        let items_json = serde_json::to_value(&items)?;

        let updated = sqlx::query_as::<_, SessionMemoryRow>(
            r#"
                UPDATE session_memory
                SET memory_items = $2, next_item_id = $3, version = version + 1, updated_at = NOW()
                WHERE session_id = $1
                RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(items_json)
        .bind(next_item_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        updated.into_memory()
    }

    pub async fn add_conversation(&self, session_id: Uuid, entry: Value) -> Result<SessionMemory> {
        let row = sqlx::query_as::<_, SessionMemoryRow>(
            r#"
                UPDATE session_memory
                SET conversations = conversations || jsonb_build_array($2::jsonb),
                version = version + 1,
                updated_at = NOW()
                WHERE session_id = $1
                RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(entry)
        .fetch_one(&self.pool)
        .await?;

        row.into_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_status_round_trips() {
        for status in [
            SessionStatus::Active,
            SessionStatus::WaitingInput,
            SessionStatus::Closed,
        ] {
            assert_eq!(SessionStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn memory_item_serializes_decision_fields_flat() {
        let item = MemoryItem {
            id: 1,
            item_type: MemoryItemType::Decision,
            content: "use postgres".to_string(),
            confidence: 0.9,
            decision: Some(DecisionDetails {
                    source: "user".to_string(),
                    decision: "use postgres".to_string(),
                    rationale: "existing infra".to_string(),
                    reversible: true,
            }),
        };

        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["source"], "user");
        assert_eq!(value["type"], "decision");
    }
}
