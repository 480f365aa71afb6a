//! Manual job triggers and lease state.
//!
//! A trigger runs the job to completion within the request. A held lease
//! answers `409` without running anything.

use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::{StatusCode, Uri},
    response::IntoResponse,
};
use serde::Serialize;

use govsync_infra::SyncError;
use govsync_infra::jobs::{
    DELEGATION_SYNC_JOB, EPOCH_SYNC_JOB, FULL_SYNC_JOB, JOB_NAMES, JobRun,
};

use crate::app::{errors, services::AppServices};

fn run_to_response<T: Serialize>(
    job_name: &str,
    run: Result<JobRun<T>, SyncError>,
) -> axum::response::Response {
    match run {
        Ok(JobRun::Completed(report)) => (StatusCode::OK, Json(JobRun::Completed(report))).into_response(),
        Ok(JobRun::AlreadyRunning) => errors::already_running(job_name),
        Err(err) => errors::sync_error_to_response(err),
    }
}

/// POST /admin/jobs/epoch-sync
pub async fn trigger_epoch_sync(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    run_to_response(EPOCH_SYNC_JOB, services.jobs.run_epoch_sync().await)
}

/// POST /admin/jobs/delegation-sync
pub async fn trigger_delegation_sync(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    run_to_response(DELEGATION_SYNC_JOB, services.jobs.run_delegation_sync().await)
}

/// POST /admin/jobs/full-sync
pub async fn trigger_full_sync(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    run_to_response(FULL_SYNC_JOB, services.jobs.run_full_sync().await)
}

/// GET /admin/jobs/:name
///
/// Mounted on each static job path as well as the `:name` fallback; the job
/// name is the last path segment either way.
pub async fn job_state(
    Extension(services): Extension<Arc<AppServices>>,
    uri: Uri,
) -> axum::response::Response {
    let name = job_name_from_path(uri.path());
    if !JOB_NAMES.contains(&name) {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("unknown job {name}"),
        );
    }
    match services.jobs.job_state(name).await {
        Ok(Some(state)) => Json(state).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {name} has never run"),
        ),
        Err(err) => errors::sync_error_to_response(err),
    }
}

fn job_name_from_path(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}
