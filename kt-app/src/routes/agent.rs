use super::{ApiError, bad_request, internal_error};
use crate::server::AppState;
use axum::routing::post;
use axum::{Extension, Json};
use kt_llm::{ChatMessage, Role};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AgentRequest {
    messages: Vec<ChatMessage>,
}

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/agent", post(post_agent))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_agent(
    Extension(state): Extension<Arc<AppState>>,
    Json(req): Json<AgentRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::debug!(messages = req.messages.len(), "agent request received");
    let Some((utterance, history)) = split_conversation(&req.messages) else {
        return Err(bad_request("messages must contain a non-empty user turn"));
    };

    let resolution = state
        .resolver
        .handle(utterance, history)
        .await
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({
        "reply": resolution.reply,
        "mutation_applied": resolution.mutation_applied,
        "tier": resolution.tier,
    })))
}

/// Last user turn is the utterance; everything before it is history.
fn split_conversation(messages: &[ChatMessage]) -> Option<(&str, &[ChatMessage])> {
    let idx = messages.iter().rposition(|m| m.role == Role::User)?;
    let utterance = messages[idx].content.trim();
    if utterance.is_empty() {
        return None;
    }
    Some((utterance, &messages[..idx]))
}
