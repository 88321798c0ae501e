//! `/react/*` endpoints: the ReAct engine's streaming entry point
//! plus read-only inspection of tasks, recursions, and state snapshots.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{assemble_context, EngineEvent, RecursionEngine, ToolCallResultView};
use crate::database::{ReactTask, TaskStatus};
use crate::error::{Error, Result};

use super::auth::{require_same_user, AuthUser};
use super::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
    .route("/react/chat/stream", post(chat_stream))
    .route("/react/tasks/{task_id}", get(get_task))
    .route("/react/tasks/{task_id}/recursions", get(get_recursions))
    .route("/react/tasks/{task_id}/states", get(get_states))
    .route("/react/tasks/{task_id}/states/{iteration_index}", get(get_state))
}

#[derive(Debug, Deserialize)]
struct ChatStreamRequest {
    agent_id: Uuid,
    message: String,
    user: String,
    session_id: Option<Uuid>,
    task_id: Option<Uuid>,
}

/// Cancels `token` when the SSE stream is dropped (client disconnect),
/// standing in for an explicit per-write disconnect poll.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    require_same_user(&auth.0, &req.user)?;

    let agent = state
    .agent_store
    .get(req.agent_id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("agent {}", req.agent_id)))?;

    let llm = state.llm_client_for(agent.llm_id).await?;
    let allowed_tools: HashSet<String> = state
    .agent_tool_store
    .allowed_for(agent.agent_id)
    .await?
    .into_iter()
    .collect();

    let engine = Arc::new(RecursionEngine::new(
            llm,
            state.tool_executor.clone(),
            allowed_tools,
            crate::database::ReactTaskStore::new(state.pool.clone()),
            crate::database::ReactRecursionStore::new(state.pool.clone()),
            crate::database::ReactPlanStepStore::new(state.pool.clone()),
    ));

    let mut task = match req.task_id {
        Some(task_id) => state
        .task_store
        .get(task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?,
        None => {
            let session_id = match req.session_id {
                Some(id) => id,
                None => state.session_store.create(req.agent_id, &req.user).await?.session_id,
            };
            state
            .task_store
            .create(
                session_id,
                req.agent_id,
                &req.user,
                &req.message,
                &req.message,
                agent.max_iteration,
            )
            .await?
        }
    };

    // Resume: `task_id` names an existing `waiting_input` task whose last
    // recursion is `CLARIFY` — the body's `message` is the user's reply.
    if task.status == TaskStatus::WaitingInput.as_str() {
        engine.resume_with_reply(&mut task, &req.message).await?;
    }

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel::<EngineEvent>();

    let run_engine = engine.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
            if let Err(err) = run_engine.run_task(task, run_cancel, tx).await {
                tracing::error!(error = %err, "recursion engine run failed");
            }
    });

    let guard = CancelOnDrop(cancel);
    let stream = stream::unfold((rx, guard), |(mut rx, guard)| async move {
            let event = rx.recv().await?;
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some((Ok(Event::default().data(data)), (rx, guard)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(super::SSE_KEEPALIVE_INTERVAL).text("keepalive")))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(task_id): Path<Uuid>, auth: AuthUser) -> Result<Json<ReactTask>> {
    let task = fetch_owned_task(&state, task_id, &auth).await?;
    Ok(Json(task))
}

async fn get_recursions(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<Vec<crate::database::ReactRecursion>>> {
    fetch_owned_task(&state, task_id, &auth).await?;
    let recursions = state.recursion_store.get_by_task(task_id).await?;
    Ok(Json(recursions))
}

/// Stored state snapshots are reconstructed on demand from C4 rather
/// than persisted redundantly: the context assembler is a pure function of
/// a task's recursions and plan steps, so there is nothing a separate table
/// would hold that isn't already derivable here.
async fn get_states(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    auth: AuthUser,
) -> Result<Json<Vec<serde_json::Value>>> {
    let task = fetch_owned_task(&state, task_id, &auth).await?;
    let recursions = state.recursion_store.get_by_task(task_id).await?;
    let plan_steps = state.plan_store.get_by_task(task_id).await?;
    let tool_results = tool_results_by_trace(&recursions);

    let snapshots = recursions
    .iter()
    .map(|r| {
            let ctx = assemble_context(&task, r.trace_id, &recursions, &plan_steps, &tool_results, &[], &[]);
            serde_json::json!({ "trace_id": r.trace_id, "iteration_index": r.iteration_index, "state": ctx })
    })
    .collect();

    Ok(Json(snapshots))
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    Path((task_id, iteration_index)): Path<(Uuid, i32)>,
    auth: AuthUser,
) -> Result<Json<serde_json::Value>> {
    let task = fetch_owned_task(&state, task_id, &auth).await?;
    let recursions = state.recursion_store.get_by_task(task_id).await?;
    let plan_steps = state.plan_store.get_by_task(task_id).await?;
    let tool_results = tool_results_by_trace(&recursions);

    let recursion = recursions
    .iter()
    .find(|r| r.iteration_index == iteration_index)
    .ok_or_else(|| Error::NotFound(format!("task {task_id} has no iteration {iteration_index}")))?;

    let ctx = assemble_context(&task, recursion.trace_id, &recursions, &plan_steps, &tool_results, &[], &[]);
    Ok(Json(
            serde_json::json!({ "trace_id": recursion.trace_id, "iteration_index": recursion.iteration_index, "state": ctx }),
    ))
}

async fn fetch_owned_task(state: &Arc<AppState>, task_id: Uuid, auth: &AuthUser) -> Result<ReactTask> {
    let task = state
    .task_store
    .get(task_id)
    .await?
    .ok_or_else(|| Error::NotFound(format!("task {task_id}")))?;
    require_same_user(&auth.0, &task.user)?;
    Ok(task)
}

fn tool_results_by_trace(
    recursions: &[crate::database::ReactRecursion],
) -> std::collections::HashMap<Uuid, Vec<ToolCallResultView>> {
    let mut map = std::collections::HashMap::new();
    for r in recursions {
        if let Some(results) = &r.tool_call_results {
            if let Ok(views) = serde_json::from_value::<Vec<ToolCallResultView>>(results.clone()) {
                map.insert(r.trace_id, views);
            }
        }
    }
    map
}
