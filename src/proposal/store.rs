//! Proposal storage
//!
//! In-memory authoritative store with a guarded status-transition API.
//! All writers funnel through [`ProposalStore::transition`]; the store is
//! the single source of truth for proposal state.

use crate::error::AppError;
use crate::proposal::{
    AuditEntry, Proposal, ProposalStatus, ProposalSummary, TransitionMetadata,
};
use crate::reviewer::ReviewerKind;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe proposal store
pub struct ProposalStore {
    proposals: RwLock<HashMap<Uuid, Proposal>>,
    /// Creation is refused once this many proposals are pending
    pending_cap: usize,
}

impl ProposalStore {
    pub fn new(pending_cap: usize) -> Self {
        Self {
            proposals: RwLock::new(HashMap::new()),
            pending_cap,
        }
    }

    /// Create a new proposal.
    ///
    /// Refused when the pending backlog is at capacity, or when a
    /// non-rejected proposal with the same target and candidate content
    /// already exists.
    pub async fn create(&self, proposal: Proposal) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;

        let pending = proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .count();
        if pending >= self.pending_cap {
            return Err(AppError::PendingLimit(self.pending_cap));
        }

        let digest = proposal.candidate_digest();
        let duplicate = proposals.values().any(|p| {
            p.status != ProposalStatus::Rejected
                && p.target_path == proposal.target_path
                && p.candidate_digest() == digest
        });
        if duplicate {
            return Err(AppError::DuplicateProposal(proposal.target_path.clone()));
        }

        proposals.insert(proposal.id, proposal.clone());
        Ok(proposal)
    }

    /// Get a proposal by ID
    pub async fn get(&self, id: Uuid) -> Result<Proposal, AppError> {
        let proposals = self.proposals.read().await;
        proposals
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))
    }

    /// List proposals, optionally filtered by status and reviewer.
    ///
    /// Return order is unspecified; callers must not rely on it.
    pub async fn list(
        &self,
        status: Option<ProposalStatus>,
        reviewer: Option<ReviewerKind>,
    ) -> Vec<Proposal> {
        let proposals = self.proposals.read().await;
        proposals
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .filter(|p| reviewer.map_or(true, |r| p.reviewer == r))
            .cloned()
            .collect()
    }

    /// Aggregate counts per status
    pub async fn summary(&self) -> ProposalSummary {
        let proposals = self.proposals.read().await;
        let mut summary = ProposalSummary::default();
        for p in proposals.values() {
            match p.status {
                ProposalStatus::Pending => summary.pending += 1,
                ProposalStatus::Approved => summary.approved += 1,
                ProposalStatus::Testing => summary.testing += 1,
                ProposalStatus::TestPassed => summary.test_passed += 1,
                ProposalStatus::TestFailed => summary.test_failed += 1,
                ProposalStatus::Applied => summary.applied += 1,
                ProposalStatus::Rejected => summary.rejected += 1,
            }
            summary.total += 1;
        }
        summary
    }

    /// Request a status transition.
    ///
    /// Only edges of the status graph are accepted; anything else fails
    /// with [`AppError::InvalidTransition`] and leaves the proposal
    /// untouched. Each accepted transition appends an audit entry rather
    /// than overwriting history.
    pub async fn transition(
        &self,
        id: Uuid,
        target: ProposalStatus,
        metadata: TransitionMetadata,
    ) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;

        if !proposal.status.can_transition_to(target) {
            return Err(AppError::InvalidTransition {
                from: proposal.status,
                to: target,
            });
        }

        let now = Utc::now();
        proposal.history.push(AuditEntry {
            from: proposal.status,
            to: target,
            reason: metadata.reason,
            at: now,
        });
        proposal.status = target;
        proposal.updated_at = now;

        if let Some(test_status) = metadata.test_status {
            proposal.test_status = Some(test_status);
        }
        if let Some(output) = metadata.test_output {
            proposal.test_output = Some(output);
        }
        if let Some(result) = metadata.result {
            proposal.result = Some(result);
        }

        Ok(proposal.clone())
    }

    /// Return a proposal from `testing` to `approved` after an
    /// inconclusive runner invocation (crash or timeout).
    ///
    /// This is the verification gate's retry path only; it is not part of
    /// the public transition graph and refuses any proposal not currently
    /// in `testing`.
    pub async fn release_for_retry(&self, id: Uuid, reason: String) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Proposal {} not found", id)))?;

        if proposal.status != ProposalStatus::Testing {
            return Err(AppError::InvalidTransition {
                from: proposal.status,
                to: ProposalStatus::Approved,
            });
        }

        let now = Utc::now();
        proposal.history.push(AuditEntry {
            from: ProposalStatus::Testing,
            to: ProposalStatus::Approved,
            reason,
            at: now,
        });
        proposal.status = ProposalStatus::Approved;
        proposal.updated_at = now;
        Ok(proposal.clone())
    }

    /// Drop terminal proposals older than the retention window.
    ///
    /// Returns the number of proposals removed.
    pub async fn prune_terminal(&self, retention: Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut proposals = self.proposals.write().await;
        let before = proposals.len();
        proposals.retain(|_, p| !(p.status.is_terminal() && p.updated_at < cutoff));
        before - proposals.len()
    }

    /// Get proposal count
    #[allow(dead_code)]
    pub async fn count(&self) -> usize {
        let proposals = self.proposals.read().await;
        proposals.len()
    }
}
