//! Reviewer routes
//!
//! Read-only view of the registered reviewer roles and their outcome
//! tallies.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::AppError;
use crate::events::OutcomeTally;
use crate::models::SuccessResponse;
use crate::reviewer::ReviewerKind;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerInfo {
    pub name: ReviewerKind,
    pub cadence_secs: u64,
    pub file_cap: usize,
    pub tally: OutcomeTally,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerListResponse {
    pub reviewers: Vec<ReviewerInfo>,
}

/// List registered reviewers with cadence, cap and outcome tallies
pub async fn list_reviewers(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<ReviewerListResponse>>, AppError> {
    let mut reviewers = Vec::with_capacity(state.reviewers.len());
    for spec in state.reviewers.iter() {
        reviewers.push(ReviewerInfo {
            name: spec.kind,
            cadence_secs: spec.cadence.as_secs(),
            file_cap: spec.file_cap,
            tally: state.learning.tally(spec.kind).await,
        });
    }

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} reviewers", reviewers.len()),
        ReviewerListResponse { reviewers },
    )))
}
