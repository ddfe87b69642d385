pub mod agent;
pub mod health;
pub mod sessions;
pub mod tasks;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(agent::router())
        .merge(sessions::router())
        .merge(tasks::router())
}

pub(crate) type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn internal_error(error: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
}

pub(crate) fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}
