use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use govsync_infra::SyncError;
use govsync_infra::store::StoreError;
use govsync_infra::upstream::UpstreamError;

pub fn sync_error_to_response(err: SyncError) -> axum::response::Response {
    tracing::error!(error = %err, "request failed");
    match err {
        SyncError::Store(StoreError::Conflict(msg)) => json_error(StatusCode::CONFLICT, "conflict", msg),
        SyncError::Store(StoreError::NotFound(msg)) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        SyncError::Store(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string()),
        SyncError::Upstream(e @ (UpstreamError::Timeout(_) | UpstreamError::RateLimited { .. })) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", e.to_string())
        }
        SyncError::Upstream(e) => json_error(StatusCode::BAD_GATEWAY, "upstream_error", e.to_string()),
        e @ SyncError::StepIncomplete { .. } => {
            json_error(StatusCode::BAD_GATEWAY, "sync_incomplete", e.to_string())
        }
        e @ SyncError::NoCompletedEpoch { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "no_completed_epoch", e.to_string())
        }
    }
}

pub fn already_running(job_name: &str) -> axum::response::Response {
    json_error(
        StatusCode::CONFLICT,
        "conflict",
        format!("job {job_name} is already running"),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
