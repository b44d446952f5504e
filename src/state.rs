//! Application state management
//!
//! Contains shared state accessible across all handlers and pipeline
//! jobs. The scheduler and the HTTP surface receive this one struct
//! instead of reaching into globals.

use std::sync::Arc;

use crate::config::Settings;
use crate::error::AppError;
use crate::events::{EventBus, TallySink};
use crate::pipeline::mirror::SourceMirror;
use crate::proposal::ProposalStore;
use crate::reviewer::ReviewerRegistry;

/// Application state shared across all handlers and timers
pub struct AppState {
    pub settings: Settings,

    /// Authoritative proposal store (has internal locking)
    pub proposals: Arc<ProposalStore>,

    /// The single shared working copy
    pub mirror: Arc<SourceMirror>,

    /// Best-effort event channel for UI consumers
    pub events: EventBus,

    /// Outcome sink for the external scoring system
    pub learning: Arc<TallySink>,

    /// Reviewer table, built once at startup
    pub reviewers: Arc<ReviewerRegistry>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let reviewers = Arc::new(ReviewerRegistry::from_config(&settings.reviewers)?);
        let proposals = Arc::new(ProposalStore::new(settings.gate.pending_cap));
        let mirror = Arc::new(SourceMirror::new(
            settings.mirror.remote.clone(),
            settings.mirror.path.clone(),
        ));

        Ok(Self {
            settings,
            proposals,
            mirror,
            events: EventBus::default(),
            learning: Arc::new(TallySink::new()),
            reviewers,
        })
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
