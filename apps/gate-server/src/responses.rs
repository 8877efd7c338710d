use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

pub(crate) fn json_ok(payload: Value) -> axum::response::Response {
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "type": "about:blank",
            "title": "Unauthorized",
            "status": 401
        })),
    )
        .into_response()
}

/// 5xx-class outcome for a genuine storage outage, deliberately
/// distinguishable from the 200 "invalid credentials" envelope.
pub(crate) fn store_unavailable() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "message": "credential store unavailable",
            "data": null
        })),
    )
        .into_response()
}
