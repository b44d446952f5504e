//! Proposal routes
//!
//! API endpoints for creating, listing and reviewing proposals, plus the
//! best-effort event stream.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;
use validator::Validate;

use crate::error::AppError;
use crate::events::{EventKind, LearningSink, OutcomeSignal};
use crate::models::SuccessResponse;
use crate::proposal::{Proposal, ProposalStatus, ProposalSummary, TransitionMetadata};
use crate::reviewer::ReviewerKind;
use crate::state::SharedState;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub reviewer: ReviewerKind,
    #[validate(length(min = 1, max = 512))]
    pub target_path: String,
    pub code_before: String,
    #[validate(length(min = 1))]
    pub code_after: String,
    #[validate(length(min = 1, max = 2048))]
    pub reason: String,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRequest {
    #[validate(length(min = 1, max = 2048))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<String>,
    pub reviewer: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalResponse {
    pub proposal: Proposal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalListResponse {
    pub proposals: Vec<Proposal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub summary: ProposalSummary,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Create a new proposal (used by external generators)
pub async fn create_proposal(
    State(state): State<SharedState>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<SuccessResponse<ProposalResponse>>), AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // The path guard runs at the door as well as in the gate
    state.mirror.resolve_target(&req.target_path)?;

    let proposal = Proposal::new(
        req.reviewer,
        req.target_path,
        req.code_before,
        req.code_after,
        req.reason,
        req.confidence,
    );
    let created = state.proposals.create(proposal).await?;

    state.events.publish(
        EventKind::Created,
        serde_json::json!({
            "id": created.id,
            "reviewer": created.reviewer,
            "targetPath": created.target_path,
        }),
    );

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            "Proposal created",
            ProposalResponse { proposal: created },
        )),
    ))
}

/// Get a proposal by ID
pub async fn get_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SuccessResponse<ProposalResponse>>, AppError> {
    let proposal = state.proposals.get(id).await?;
    Ok(Json(SuccessResponse::with_data(
        "Proposal retrieved",
        ProposalResponse { proposal },
    )))
}

/// List proposals, optionally filtered by status and reviewer
pub async fn list_proposals(
    State(state): State<SharedState>,
    Query(query): Query<ProposalListQuery>,
) -> Result<Json<SuccessResponse<ProposalListResponse>>, AppError> {
    let status = match &query.status {
        Some(raw) => Some(
            ProposalStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown status: {raw}")))?,
        ),
        None => None,
    };
    let reviewer = match &query.reviewer {
        Some(raw) => Some(
            ReviewerKind::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("Unknown reviewer: {raw}")))?,
        ),
        None => None,
    };

    let proposals = state.proposals.list(status, reviewer).await;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} proposals", proposals.len()),
        ProposalListResponse { proposals },
    )))
}

/// Approve a pending proposal
pub async fn approve_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApprovalRequest>,
) -> Result<Json<SuccessResponse<ProposalResponse>>, AppError> {
    let reason = req
        .comment
        .unwrap_or_else(|| "Approved by reviewer feedback".to_string());
    let proposal = state
        .proposals
        .transition(id, ProposalStatus::Approved, TransitionMetadata::with_reason(reason))
        .await?;

    state
        .learning
        .report_outcome(proposal.reviewer, OutcomeSignal::Approved, &proposal.target_path)
        .await;

    Ok(Json(SuccessResponse::with_data(
        "Proposal approved",
        ProposalResponse { proposal },
    )))
}

/// Reject a proposal with a reason
pub async fn reject_proposal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RejectionRequest>,
) -> Result<Json<SuccessResponse<ProposalResponse>>, AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let proposal = state
        .proposals
        .transition(
            id,
            ProposalStatus::Rejected,
            TransitionMetadata::with_reason(req.reason.clone()),
        )
        .await?;

    state
        .learning
        .report_outcome(proposal.reviewer, OutcomeSignal::Rejected, &req.reason)
        .await;

    Ok(Json(SuccessResponse::with_data(
        "Proposal rejected",
        ProposalResponse { proposal },
    )))
}

/// Aggregate counts per status
pub async fn proposal_summary(
    State(state): State<SharedState>,
) -> Result<Json<SuccessResponse<SummaryResponse>>, AppError> {
    let summary = state.proposals.summary().await;
    Ok(Json(SuccessResponse::with_data(
        "Summary computed",
        SummaryResponse { summary },
    )))
}

/// Best-effort event stream.
///
/// Lag is dropped silently; consumers reconstruct state by polling the
/// proposal endpoints.
pub async fn proposal_events(
    State(state): State<SharedState>,
) -> Sse<KeepAliveStream<Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_else(|_| String::from("{}"));
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None, // Skip lag errors
    });

    let stream: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> = Box::pin(stream);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CorsConfig, GateConfig, MirrorConfig, ReviewerConfig, SchedulerConfig, ServerConfig,
        Settings,
    };
    use crate::state::AppState;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn test_state() -> SharedState {
        let root = std::env::temp_dir().join(format!("routes-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        let settings = Settings {
            server: ServerConfig::default(),
            mirror: MirrorConfig {
                remote: "https://example.com/repo.git".to_string(),
                path: root.to_string_lossy().into_owned(),
            },
            scheduler: SchedulerConfig::default(),
            gate: GateConfig::default(),
            reviewers: ReviewerConfig::defaults(),
            cors: CorsConfig::default(),
        };
        Arc::new(AppState::new(settings).unwrap())
    }

    fn create_request(path: &str) -> CreateProposalRequest {
        CreateProposalRequest {
            reviewer: ReviewerKind::Optimizer,
            target_path: path.to_string(),
            code_before: "before".to_string(),
            code_after: "after".to_string(),
            reason: "swap prints".to_string(),
            confidence: 0.8,
        }
    }

    #[tokio::test]
    async fn create_then_fetch_round_trip() {
        let state = test_state();
        let (status, Json(body)) = create_proposal(
            State(state.clone()),
            Json(create_request("lib/a.dart")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        let id = body.data.unwrap().proposal.id;

        let Json(fetched) = get_proposal(State(state), Path(id)).await.unwrap();
        assert_eq!(fetched.data.unwrap().proposal.status, ProposalStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_escaping_paths() {
        let state = test_state();
        let err = create_proposal(
            State(state),
            Json(create_request("../../etc/passwd")),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PathEscape(_)));
    }

    #[tokio::test]
    async fn create_rejects_invalid_bodies() {
        let state = test_state();
        let mut req = create_request("lib/a.dart");
        req.reason = String::new();
        let err = create_proposal(State(state), Json(req)).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn approve_then_reapprove_surfaces_typed_error() {
        let state = test_state();
        let (_, Json(body)) = create_proposal(
            State(state.clone()),
            Json(create_request("lib/a.dart")),
        )
        .await
        .unwrap();
        let id = body.data.unwrap().proposal.id;

        approve_proposal(
            State(state.clone()),
            Path(id),
            Json(ApprovalRequest { comment: None }),
        )
        .await
        .unwrap();

        let err = approve_proposal(
            State(state),
            Path(id),
            Json(ApprovalRequest { comment: None }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn list_filters_are_strict() {
        let state = test_state();
        let err = list_proposals(
            State(state.clone()),
            Query(ProposalListQuery {
                status: Some("merged".to_string()),
                reviewer: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let Json(ok) = list_proposals(
            State(state),
            Query(ProposalListQuery {
                status: Some("pending".to_string()),
                reviewer: Some("optimizer".to_string()),
            }),
        )
        .await
        .unwrap();
        assert_eq!(ok.data.unwrap().proposals.len(), 0);
    }

    #[tokio::test]
    async fn summary_counts_by_status() {
        let state = test_state();
        create_proposal(State(state.clone()), Json(create_request("lib/a.dart")))
            .await
            .unwrap();
        create_proposal(State(state.clone()), Json(create_request("lib/b.dart")))
            .await
            .unwrap();

        let Json(body) = proposal_summary(State(state)).await.unwrap();
        let summary = body.data.unwrap().summary;
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.total, 2);
    }
}
