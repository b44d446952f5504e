//! Event bus and learning feedback sink
//!
//! Both channels are best-effort. Events are UI hints with no delivery
//! guarantee or persistence; the proposal store remains the sole source
//! of truth and consumers must tolerate missed events. Outcome reports
//! feed an external scoring system and never touch proposal state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::reviewer::ReviewerKind;

/// Kinds of pipeline events pushed to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "proposal:created")]
    Created,
    #[serde(rename = "proposal:test-started")]
    TestStarted,
    #[serde(rename = "proposal:test-finished")]
    TestFinished,
    #[serde(rename = "proposal:test-failed")]
    TestFailed,
    #[serde(rename = "proposal:applied")]
    Applied,
}

/// A single pipeline event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalEvent {
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget broadcast channel for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProposalEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Absent or lagging subscribers are ignored.
    pub fn publish(&self, kind: EventKind, payload: serde_json::Value) {
        let event = ProposalEvent {
            kind,
            payload,
            at: Utc::now(),
        };
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProposalEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Outcome signals reported to the learning sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeSignal {
    Approved,
    Rejected,
    RejectedByTest,
    Applied,
}

impl OutcomeSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeSignal::Approved => "approved",
            OutcomeSignal::Rejected => "rejected",
            OutcomeSignal::RejectedByTest => "rejected-by-test",
            OutcomeSignal::Applied => "applied",
        }
    }
}

/// Consumer of proposal outcome signals.
///
/// Implementations own the scoring state; the pipeline only references
/// reviewers by name. Reporting must never fail the caller.
#[async_trait]
pub trait LearningSink: Send + Sync {
    async fn report_outcome(&self, reviewer: ReviewerKind, signal: OutcomeSignal, detail: &str);
}

/// Per-reviewer outcome counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeTally {
    pub approved: usize,
    pub rejected: usize,
    pub rejected_by_test: usize,
    pub applied: usize,
}

/// Default sink: logs every signal and keeps in-memory tallies for
/// diagnostics.
#[derive(Default)]
pub struct TallySink {
    tallies: RwLock<HashMap<ReviewerKind, OutcomeTally>>,
}

impl TallySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tally(&self, reviewer: ReviewerKind) -> OutcomeTally {
        self.tallies
            .read()
            .await
            .get(&reviewer)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LearningSink for TallySink {
    async fn report_outcome(&self, reviewer: ReviewerKind, signal: OutcomeSignal, detail: &str) {
        info!(
            reviewer = %reviewer,
            signal = signal.as_str(),
            detail,
            "📊 Outcome reported"
        );
        let mut tallies = self.tallies.write().await;
        let tally = tallies.entry(reviewer).or_default();
        match signal {
            OutcomeSignal::Approved => tally.approved += 1,
            OutcomeSignal::Rejected => tally.rejected += 1,
            OutcomeSignal::RejectedByTest => tally.rejected_by_test += 1,
            OutcomeSignal::Applied => tally.applied += 1,
        }
        debug!(reviewer = %reviewer, ?tally, "Updated outcome tally");
    }
}
