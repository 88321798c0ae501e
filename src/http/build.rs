//! `/build/chat`: the Agent Builder (C9), a plain request/response
//! endpoint (no streaming — the builder's whole reply is one JSON object).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::agent::{AgentBuilder, BuilderReply};
use crate::error::{Error, Result};

use super::auth::AuthUser;
use super::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/build/chat", post(chat))
}

#[derive(Debug, Deserialize)]
struct BuildChatRequest {
    session_id: Option<Uuid>,
    #[allow(dead_code)]
    agent_id: Option<Uuid>,
    llm_id: Option<Uuid>,
    content: String,
}

#[derive(serde::Serialize)]
struct BuildChatResponse {
    session_id: Uuid,
    #[serde(flatten)]
    reply: BuilderReply,
}

async fn chat(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<BuildChatRequest>,
) -> Result<Json<BuildChatResponse>> {
    let mut sessions = state.builder_sessions.lock().await;

    let session_id = req.session_id.unwrap_or_else(Uuid::new_v4);
    let (llm_id, mut builder) = match sessions.remove(&session_id) {
        Some(existing) => existing,
        None => {
            let llm_id = req
            .llm_id
            .ok_or_else(|| Error::Validation("llm_id is required to start a build session".to_string()))?;
            (llm_id, AgentBuilder::new())
        }
    };

    let llm = state.llm_client_for(llm_id).await?;
    let reply = builder.step(&llm, &req.content).await?;

    sessions.insert(session_id, (llm_id, builder));

    Ok(Json(BuildChatResponse { session_id, reply }))
}
