use super::{ApiError, bad_request, internal_error};
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PostMessageRequest {
    content: String,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/sessions", get(list_sessions))
        .route(
            "/api/sessions/{id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{id}/messages", post(post_message))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_sessions(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "sessions": state.sessions.list() }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.sessions.get(&id) {
        Some(session) => Ok(Json(serde_json::json!({ "session": session }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "session not found" })),
        )),
    }
}

#[tracing::instrument(level = "info", skip_all)]
async fn delete_session(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let removed = state.sessions.reset(&id);
    Json(serde_json::json!({ "status": if removed { "ok" } else { "not_found" } }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_message(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    tracing::debug!(session_id = %id, "session message received");
    let content = req.content.trim();
    if content.is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let history = state.sessions.history(&id);
    let resolution = state
        .resolver
        .handle(content, &history)
        .await
        .map_err(internal_error)?;
    state
        .sessions
        .record_exchange(&id, content, &resolution.reply);

    Ok(Json(serde_json::json!({
        "session_id": id,
        "reply": resolution.reply,
        "mutation_applied": resolution.mutation_applied,
        "tier": resolution.tier,
    })))
}
