use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let gateway = state.resolver.gateway();
    Json(serde_json::json!({
        "ok": true,
        "checked_at": Utc::now(),
        "gateway_configured": gateway.is_some(),
        "models": gateway.map(|g| g.models().to_vec()).unwrap_or_default(),
    }))
}
