use axum::{
    Router,
    routing::{get, post},
};

pub mod jobs;
pub mod proposals;
pub mod system;

pub fn router() -> Router {
    Router::new()
        // Static segments win over `:name`, so each job path serves its own state.
        .route(
            "/admin/jobs/epoch-sync",
            post(jobs::trigger_epoch_sync).get(jobs::job_state),
        )
        .route(
            "/admin/jobs/delegation-sync",
            post(jobs::trigger_delegation_sync).get(jobs::job_state),
        )
        .route(
            "/admin/jobs/full-sync",
            post(jobs::trigger_full_sync).get(jobs::job_state),
        )
        .route("/admin/jobs/:name", get(jobs::job_state))
        .route("/proposals/:id/tally", get(proposals::tally))
}
