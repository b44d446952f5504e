//! Proposal data models
//!
//! Defines the structure of file-level change proposals and the guarded
//! status graph they move through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::reviewer::ReviewerKind;

/// Proposal status in the review workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalStatus {
    /// Created by a reviewer cycle, awaiting external feedback
    Pending,
    /// Approved for verification
    Approved,
    /// Currently being verified against the mirror
    Testing,
    /// Verification succeeded, awaiting publish
    TestPassed,
    /// Verification failed
    TestFailed,
    /// Published upstream
    Applied,
    /// Rejected by a reviewer or the pipeline
    Rejected,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 7] = [
        ProposalStatus::Pending,
        ProposalStatus::Approved,
        ProposalStatus::Testing,
        ProposalStatus::TestPassed,
        ProposalStatus::TestFailed,
        ProposalStatus::Applied,
        ProposalStatus::Rejected,
    ];

    /// Terminal proposals are immutable; no transition path may leave them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Applied | ProposalStatus::Rejected)
    }

    /// The status graph:
    /// pending -> approved | rejected
    /// approved -> testing
    /// testing -> test-passed | test-failed
    /// test-passed -> applied
    /// plus: any non-terminal status -> rejected
    pub fn can_transition_to(&self, target: ProposalStatus) -> bool {
        use ProposalStatus::*;
        match (self, target) {
            (Pending, Approved) => true,
            (Approved, Testing) => true,
            (Testing, TestPassed) | (Testing, TestFailed) => true,
            (TestPassed, Applied) => true,
            (from, Rejected) if !from.is_terminal() => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Testing => "testing",
            ProposalStatus::TestPassed => "test-passed",
            ProposalStatus::TestFailed => "test-failed",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<ProposalStatus> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the verification runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

/// One entry in a proposal's append-only transition history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub from: ProposalStatus,
    pub to: ProposalStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A candidate file-level code change moving through the review pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    /// Reviewer role that produced this candidate
    pub reviewer: ReviewerKind,
    /// Path of the target file, relative to the mirror root
    pub target_path: String,
    /// File content before the change
    pub code_before: String,
    /// Proposed file content
    pub code_after: String,
    /// Reviewer's stated rationale for the change
    pub reason: String,
    /// Reviewer confidence, clamped to [0, 1]
    pub confidence: f64,
    /// Current status
    pub status: ProposalStatus,
    /// Verification outcome, once the runner has reported
    pub test_status: Option<TestStatus>,
    /// Captured runner output for failed verifications
    pub test_output: Option<String>,
    /// Upstream change-request reference, set when applied
    pub result: Option<String>,
    /// Append-only transition audit trail
    pub history: Vec<AuditEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        reviewer: ReviewerKind,
        target_path: String,
        code_before: String,
        code_after: String,
        reason: String,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reviewer,
            target_path,
            code_before,
            code_after,
            reason,
            confidence: confidence.clamp(0.0, 1.0),
            status: ProposalStatus::Pending,
            test_status: None,
            test_output: None,
            result: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Digest over target path and candidate content, used to suppress
    /// duplicate proposals for the same change.
    pub fn candidate_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.target_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.code_after.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Optional fields recorded alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionMetadata {
    pub reason: String,
    pub test_status: Option<TestStatus>,
    pub test_output: Option<String>,
    pub result: Option<String>,
}

impl TransitionMetadata {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }
}

/// Aggregate proposal counts per status
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSummary {
    pub pending: usize,
    pub approved: usize,
    pub testing: usize,
    pub test_passed: usize,
    pub test_failed: usize,
    pub applied: usize,
    pub rejected: usize,
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        for terminal in [ProposalStatus::Applied, ProposalStatus::Rejected] {
            for target in ProposalStatus::ALL {
                assert!(
                    !terminal.can_transition_to(target),
                    "{} -> {} should be rejected",
                    terminal,
                    target
                );
            }
        }
    }

    #[test]
    fn every_non_terminal_status_can_be_rejected() {
        for status in ProposalStatus::ALL {
            if !status.is_terminal() {
                assert!(status.can_transition_to(ProposalStatus::Rejected));
            }
        }
    }

    #[test]
    fn status_round_trips_through_wire_form() {
        for status in ProposalStatus::ALL {
            assert_eq!(ProposalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProposalStatus::parse("merged"), None);
    }

    #[test]
    fn confidence_is_clamped() {
        let p = Proposal::new(
            ReviewerKind::Optimizer,
            "lib/a.dart".into(),
            "a".into(),
            "b".into(),
            "test".into(),
            1.7,
        );
        assert_eq!(p.confidence, 1.0);
    }
}
