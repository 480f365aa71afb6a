use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use govsync_core::ProposalId;

use crate::app::{errors, services::AppServices};

/// GET /proposals/:id/tally
pub async fn tally(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let proposal_id = match ProposalId::parse(id) {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };
    match services.jobs.proposal_tally(&proposal_id).await {
        Ok(Some(tally)) => Json(tally).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no ledger snapshot for proposal {proposal_id}"),
        ),
        Err(err) => errors::sync_error_to_response(err),
    }
}
