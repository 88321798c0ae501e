//! `/sessions/*` endpoints, backed by C6.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::database::{MemoryDelta, Session, SessionMemory};
use crate::error::{Error, Result};

use super::auth::{require_same_user, AuthUser};
use super::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
    .route("/sessions", post(create_session).get(list_sessions))
    .route("/sessions/{id}", get(get_session).delete(delete_session))
    .route("/sessions/{id}/memory", get(get_memory).post(apply_memory_delta))
    .route("/sessions/{id}/history", post(append_history))
    .route("/sessions/{id}/full-history", get(full_history))
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    agent_id: Uuid,
    user: String,
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>> {
    require_same_user(&auth.0, &req.user)?;
    let session = state.session_store.create(req.agent_id, &req.user).await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    user: String,
    agent_id: Option<Uuid>,
    limit: Option<usize>,
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<Session>>> {
    require_same_user(&auth.0, &query.user)?;
    let mut sessions = state.session_store.get_by_user(&query.user).await?;
    if let Some(agent_id) = query.agent_id {
        sessions.retain(|s| s.agent_id == agent_id);
    }
    if let Some(limit) = query.limit {
        sessions.truncate(limit);
    }
    Ok(Json(sessions))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<Session>> {
    let session = fetch_owned_session(&state, id, &auth).await?;
    Ok(Json(session))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> Result<()> {
    fetch_owned_session(&state, id, &auth).await?;
    state.session_store.delete(id).await?;
    Ok(())
}

async fn get_memory(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<SessionMemory>> {
    fetch_owned_session(&state, id, &auth).await?;
    let memory = state
    .session_memory_store
    .get(id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("session memory {id}")))?;
    Ok(Json(memory))
}

#[derive(Debug, Deserialize)]
struct MemoryDeltaRequest {
    #[serde(default)]
    add: Vec<MemoryUpsertItem>,
    #[serde(default)]
    update: Vec<MemoryUpsertItem>,
    #[serde(default)]
    delete: Vec<MemoryDeleteItem>,
}

#[derive(Debug, Deserialize)]
struct MemoryUpsertItem {
    id: Option<i64>,
    #[serde(rename = "type")]
    item_type: crate::database::MemoryItemType,
    content: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(flatten)]
    decision: Option<crate::database::DecisionDetails>,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct MemoryDeleteItem {
    id: i64,
}

async fn apply_memory_delta(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    Json(req): Json<MemoryDeltaRequest>,
) -> Result<Json<SessionMemory>> {
    fetch_owned_session(&state, id, &auth).await?;

    let mut deltas = Vec::with_capacity(req.add.len() + req.update.len() + req.delete.len());
    for item in req.add {
        deltas.push(MemoryDelta::Upsert {
                id: None,
                item_type: item.item_type,
                content: item.content,
                confidence: item.confidence,
                decision: item.decision,
        });
    }
    for item in req.update {
        deltas.push(MemoryDelta::Upsert {
                id: item.id,
                item_type: item.item_type,
                content: item.content,
                confidence: item.confidence,
                decision: item.decision,
        });
    }
    for item in req.delete {
        deltas.push(MemoryDelta::Delete { id: item.id });
    }

    let memory = state.session_memory_store.apply_memory_delta(id, deltas).await?;
    Ok(Json(memory))
}

#[derive(Debug, Deserialize)]
struct HistoryEntryRequest {
    #[serde(rename = "type")]
    entry_type: String,
    content: Value,
}

async fn append_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
    Json(req): Json<HistoryEntryRequest>,
) -> Result<Json<Session>> {
    let session = fetch_owned_session(&state, id, &auth).await?;

    let mut history = match &session.chat_history {
        Value::Array(items) => items.clone(),
        _ => Vec::new(),
    };
    history.push(serde_json::json!({
                "type": req.entry_type,
                "content": req.content,
                "timestamp": chrono::Utc::now().to_rfc3339(),
    }));

    let session = state
    .session_store
    .update_chat_history(id, Value::Array(history))
    .await?;
    Ok(Json(session))
}

async fn full_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<Vec<Value>>> {
    fetch_owned_session(&state, id, &auth).await?;

    let mut tasks = state.task_store.get_by_session(id).await?;
    tasks.sort_by_key(|t| t.created_at);

    let mut history = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut recursions = state.recursion_store.get_by_task(task.task_id).await?;
        recursions.sort_by_key(|r| r.iteration_index);
        history.push(serde_json::json!({ "task": task, "recursions": recursions }));
    }

    Ok(Json(history))
}

async fn fetch_owned_session(state: &Arc<AppState>, id: Uuid, auth: &AuthUser) -> Result<Session> {
    let session = state
    .session_store
    .get(id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
    require_same_user(&auth.0, &session.user_id)?;
    Ok(session)
}
