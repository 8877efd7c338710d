use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use crate::AppState;

/// Liveness probe. Succeeds as soon as the listener is bound; upstream
/// supervisors poll this to detect readiness.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Meta",
    operation_id = "health_doc",
    description = "Service liveness probe.",
    responses(
        (status = 200, description = "Service healthy", body = serde_json::Value)
    )
)]
pub async fn health() -> impl IntoResponse {
    crate::responses::json_ok(json!({"status": "ok"}))
}

/// Service banner.
#[utoipa::path(
    get,
    path = "/",
    tag = "Meta",
    operation_id = "index_doc",
    description = "Service metadata.",
    responses(
        (status = 200, description = "Service metadata", body = serde_json::Value)
    )
)]
pub async fn index() -> impl IntoResponse {
    crate::responses::json_ok(json!({
        "status": "running",
        "api": "Gate Verification API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Read-only snapshot of the supervised companion process.
#[utoipa::path(
    get,
    path = "/state/companion",
    tag = "Meta",
    operation_id = "state_companion_doc",
    description = "Supervised companion lifecycle snapshot.",
    responses(
        (status = 200, description = "Companion status", body = serde_json::Value)
    )
)]
pub async fn state_companion(State(state): State<AppState>) -> impl IntoResponse {
    match state.companion() {
        Some(sup) => {
            let status = sup.status().await;
            crate::responses::json_ok(
                serde_json::to_value(status).unwrap_or_else(|_| json!({})),
            )
        }
        None => crate::responses::json_ok(json!({"state": "disabled"})),
    }
}
