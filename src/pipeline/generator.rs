//! Candidate generator
//!
//! Drives one reviewer's generation cycle: sync the mirror, select up to
//! K matching files and persist one pending proposal per successful
//! suggestion. A failure on one file is isolated; the rest of the batch
//! still runs.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::events::{EventBus, EventKind};
use crate::pipeline::mirror::SourceMirror;
use crate::proposal::{Proposal, ProposalStore};
use crate::reviewer::{ReviewerKind, ReviewerSpec, SuggestionEngine};

/// Outcome of one generation cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub reviewer: ReviewerKind,
    pub files_considered: usize,
    pub proposals_created: usize,
    pub skipped: usize,
    pub failures: usize,
}

pub struct CandidateGenerator {
    store: Arc<ProposalStore>,
    mirror: Arc<SourceMirror>,
    events: EventBus,
}

impl CandidateGenerator {
    pub fn new(store: Arc<ProposalStore>, mirror: Arc<SourceMirror>, events: EventBus) -> Self {
        Self {
            store,
            mirror,
            events,
        }
    }

    /// Run one generation cycle for a reviewer.
    ///
    /// A sync failure aborts the whole cycle (retried on the next tick);
    /// per-file suggestion failures are logged and skipped.
    pub async fn run_cycle(&self, spec: &ReviewerSpec) -> Result<CycleReport, AppError> {
        self.mirror.ensure_up_to_date().await?;

        let files = self.mirror.select_files(&spec.selector, spec.file_cap)?;
        let mut report = CycleReport {
            reviewer: spec.kind,
            files_considered: files.len(),
            proposals_created: 0,
            skipped: 0,
            failures: 0,
        };

        for rel in files {
            let code = match self.mirror.read_file(&rel).await {
                Ok(code) => code,
                Err(e) => {
                    warn!(reviewer = %spec.kind, file = %rel, error = %e, "Skipping unreadable file");
                    report.failures += 1;
                    continue;
                }
            };

            match spec.engine.suggest(&rel, &code).await {
                Ok(Some(suggestion)) if suggestion.code_after != code => {
                    let proposal = Proposal::new(
                        spec.kind,
                        rel.clone(),
                        code,
                        suggestion.code_after,
                        suggestion.reason,
                        suggestion.confidence,
                    );
                    match self.store.create(proposal).await {
                        Ok(created) => {
                            report.proposals_created += 1;
                            self.events.publish(
                                EventKind::Created,
                                serde_json::json!({
                                    "id": created.id,
                                    "reviewer": created.reviewer,
                                    "targetPath": created.target_path,
                                }),
                            );
                        }
                        Err(AppError::DuplicateProposal(path)) => {
                            debug!(reviewer = %spec.kind, file = %path, "Candidate already proposed");
                            report.skipped += 1;
                        }
                        Err(AppError::PendingLimit(cap)) => {
                            warn!(reviewer = %spec.kind, cap, "Pending backlog full, ending cycle early");
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(_) => {
                    report.skipped += 1;
                }
                Err(e) => {
                    // One bad file must not starve the rest of the batch.
                    let err = AppError::Generation {
                        path: rel.clone(),
                        message: e.to_string(),
                    };
                    warn!(reviewer = %spec.kind, error = %err, "Suggestion failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            reviewer = %spec.kind,
            files = report.files_considered,
            created = report.proposals_created,
            skipped = report.skipped,
            failures = report.failures,
            "🧠 Generation cycle finished"
        );
        Ok(report)
    }
}
