//! `/preview/chat/stream`: scene-graph streaming (C8).

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::{run_preview_chat, PreviewChatRequest};
use crate::error::{Error, Result};

use super::auth::AuthUser;
use super::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/preview/chat/stream", post(chat_stream))
}

async fn chat_stream(
    State(state): State<Arc<AppState>>,
    _auth: AuthUser,
    Json(req): Json<PreviewChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let llm_id = req
    .agent_detail
    .get("llm_id")
    .and_then(|v| v.as_str())
    .and_then(|s| Uuid::parse_str(s).ok())
    .ok_or_else(|| Error::Validation("agent_detail.llm_id missing or invalid".to_string()))?;

    let llm = state.llm_client_for(llm_id).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
            if let Err(err) = run_preview_chat(&llm, req, tx).await {
                tracing::error!(error = %err, "scene-graph chat run failed");
            }
    });

    let stream = stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some((Ok(Event::default().data(data)), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(super::SSE_KEEPALIVE_INTERVAL).text("keepalive")))
}
