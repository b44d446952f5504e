//! Verification gate
//!
//! The reconciliation pass: writes approved candidates into the mirror,
//! runs the external test runner and hands verified proposals to the
//! publisher. Proposals are processed strictly sequentially because they
//! all share the one mutable working copy.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::events::{EventBus, EventKind, LearningSink, OutcomeSignal};
use crate::pipeline::mirror::SourceMirror;
use crate::pipeline::publisher::Publisher;
use crate::proposal::{
    Proposal, ProposalStatus, ProposalStore, TestStatus, TransitionMetadata,
};

/// What the external runner reported
#[derive(Debug, Clone)]
pub enum RunnerVerdict {
    Passed { output: String },
    Failed { output: String },
}

/// Invokes the configured test command over the mirror.
///
/// One blocking process per proposal, bounded by the configured timeout.
/// A spawn failure or timeout is an availability error, not a verdict.
pub struct TestRunner {
    command: Vec<String>,
    timeout: Duration,
}

impl TestRunner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub async fn run(&self, workdir: &Path) -> Result<RunnerVerdict, AppError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AppError::RunnerUnavailable("Test command is empty".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(workdir);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::RunnerUnavailable(format!(
                    "Runner exceeded {}s timeout",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::RunnerUnavailable(format!("{program}: {e}")))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(RunnerVerdict::Passed { output: text })
        } else {
            Ok(RunnerVerdict::Failed { output: text })
        }
    }
}

/// Outcome counters for one reconciliation pass
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub examined: usize,
    pub applied: usize,
    pub test_failed: usize,
    pub inconclusive: usize,
    pub rejected: usize,
    pub publish_retries: usize,
    pub publish_failures: usize,
}

pub struct VerificationGate {
    store: Arc<ProposalStore>,
    mirror: Arc<SourceMirror>,
    runner: TestRunner,
    publisher: Arc<dyn Publisher>,
    events: EventBus,
    learning: Arc<dyn LearningSink>,
}

impl VerificationGate {
    pub fn new(
        store: Arc<ProposalStore>,
        mirror: Arc<SourceMirror>,
        runner: TestRunner,
        publisher: Arc<dyn Publisher>,
        events: EventBus,
        learning: Arc<dyn LearningSink>,
    ) -> Self {
        Self {
            store,
            mirror,
            runner,
            publisher,
            events,
            learning,
        }
    }

    /// One reconciliation pass.
    ///
    /// Publish retries left over from earlier passes run first (verified
    /// content is already in the working copy; re-testing would be
    /// wasted), then each approved proposal is verified exactly once.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport::default();

        let unpublished = self.store.list(Some(ProposalStatus::TestPassed), None).await;
        for proposal in unpublished {
            report.publish_retries += 1;
            if !self.try_publish(&proposal, &mut report).await {
                report.publish_failures += 1;
            }
        }

        let approved = self.store.list(Some(ProposalStatus::Approved), None).await;
        report.examined = approved.len();
        for proposal in approved {
            self.verify_one(proposal, &mut report).await;
        }

        info!(
            examined = report.examined,
            applied = report.applied,
            failed = report.test_failed,
            inconclusive = report.inconclusive,
            "🔁 Reconciliation pass finished"
        );
        Ok(report)
    }

    /// Verify a single approved proposal against the mirror.
    async fn verify_one(&self, proposal: Proposal, report: &mut ReconcileReport) {
        // Path guard before anything touches the working copy
        if let Err(e) = self.mirror.resolve_target(&proposal.target_path) {
            warn!(proposal = %proposal.id, error = %e, "Rejecting proposal with unsafe target");
            let _ = self
                .store
                .transition(
                    proposal.id,
                    ProposalStatus::Rejected,
                    TransitionMetadata::with_reason(format!("Unsafe target path: {e}")),
                )
                .await;
            self.learning
                .report_outcome(proposal.reviewer, OutcomeSignal::Rejected, "unsafe target path")
                .await;
            report.rejected += 1;
            return;
        }

        // Claim the proposal; a concurrent reject between list and here
        // simply makes the claim fail.
        let claimed = match self
            .store
            .transition(
                proposal.id,
                ProposalStatus::Testing,
                TransitionMetadata::with_reason("Verification started"),
            )
            .await
        {
            Ok(p) => p,
            Err(AppError::InvalidTransition { from, .. }) => {
                debug!(proposal = %proposal.id, status = %from, "Proposal moved before verification, skipping");
                return;
            }
            Err(e) => {
                warn!(proposal = %proposal.id, error = %e, "Could not claim proposal");
                return;
            }
        };

        self.events.publish(
            EventKind::TestStarted,
            serde_json::json!({ "id": claimed.id, "targetPath": claimed.target_path }),
        );

        if let Err(e) = self
            .mirror
            .write_candidate(&claimed.target_path, &claimed.code_after)
            .await
        {
            // The candidate never reached the runner: inconclusive
            warn!(proposal = %claimed.id, error = %e, "Candidate write failed, releasing for retry");
            let _ = self
                .store
                .release_for_retry(claimed.id, format!("Candidate write failed: {e}"))
                .await;
            report.inconclusive += 1;
            return;
        }

        match self.runner.run(self.mirror.root()).await {
            Ok(RunnerVerdict::Passed { output }) => {
                debug!(proposal = %claimed.id, runner_output_bytes = output.len(), "Runner reported pass");
                let passed = match self
                    .store
                    .transition(
                        claimed.id,
                        ProposalStatus::TestPassed,
                        TransitionMetadata {
                            reason: "Runner reported pass".to_string(),
                            test_status: Some(TestStatus::Passed),
                            test_output: None,
                            result: None,
                        },
                    )
                    .await
                {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(proposal = %claimed.id, error = %e, "Could not record pass");
                        return;
                    }
                };
                self.events.publish(
                    EventKind::TestFinished,
                    serde_json::json!({ "id": passed.id, "verdict": "passed" }),
                );
                // Hand off to the publisher within the same pass
                if !self.try_publish(&passed, report).await {
                    report.publish_failures += 1;
                }
            }
            Ok(RunnerVerdict::Failed { output }) => {
                let _ = self
                    .store
                    .transition(
                        claimed.id,
                        ProposalStatus::TestFailed,
                        TransitionMetadata {
                            reason: "Runner reported failure".to_string(),
                            test_status: Some(TestStatus::Failed),
                            test_output: Some(output.clone()),
                            result: None,
                        },
                    )
                    .await;
                self.events.publish(
                    EventKind::TestFailed,
                    serde_json::json!({ "id": claimed.id, "targetPath": claimed.target_path }),
                );
                self.learning
                    .report_outcome(claimed.reviewer, OutcomeSignal::RejectedByTest, &output)
                    .await;
                report.test_failed += 1;
            }
            Err(e) => {
                // Crash or timeout: no verdict was reached, so no terminal
                // transition is consumed and the next pass retries.
                warn!(proposal = %claimed.id, error = %e, "Runner inconclusive, releasing for retry");
                let _ = self
                    .store
                    .release_for_retry(claimed.id, format!("Runner inconclusive: {e}"))
                    .await;
                report.inconclusive += 1;
            }
        }
    }

    /// Publish a test-passed proposal and mark it applied.
    ///
    /// Returns false when publishing failed; the proposal then stays
    /// `test-passed` and is retried on a later pass without re-testing.
    async fn try_publish(&self, proposal: &Proposal, report: &mut ReconcileReport) -> bool {
        match self.publisher.publish(proposal).await {
            Ok(reference) => {
                match self
                    .store
                    .transition(
                        proposal.id,
                        ProposalStatus::Applied,
                        TransitionMetadata {
                            reason: "Published upstream".to_string(),
                            test_status: None,
                            test_output: None,
                            result: Some(reference.clone()),
                        },
                    )
                    .await
                {
                    Ok(applied) => {
                        self.events.publish(
                            EventKind::Applied,
                            serde_json::json!({ "id": applied.id, "result": reference }),
                        );
                        self.learning
                            .report_outcome(applied.reviewer, OutcomeSignal::Applied, &reference)
                            .await;
                        report.applied += 1;
                        true
                    }
                    Err(e) => {
                        warn!(proposal = %proposal.id, error = %e, "Could not record applied status");
                        false
                    }
                }
            }
            Err(e) => {
                warn!(proposal = %proposal.id, error = %e, "Publish failed, will retry next pass");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TallySink;
    use crate::reviewer::ReviewerKind;
    use async_trait::async_trait;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    /// Publisher double that records calls and can be told to fail.
    struct RecordingPublisher {
        calls: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl RecordingPublisher {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }

        async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, proposal: &Proposal) -> Result<String, AppError> {
            self.calls.lock().await.push(proposal.id);
            if self.fail {
                Err(AppError::Publish("host unreachable".to_string()))
            } else {
                Ok(format!("https://example.com/pr/{}", proposal.id))
            }
        }
    }

    fn scratch_mirror() -> Arc<SourceMirror> {
        let root = std::env::temp_dir().join(format!("gate-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        Arc::new(SourceMirror::detached(root))
    }

    fn pass_runner() -> TestRunner {
        TestRunner::new(vec!["true".to_string()], Duration::from_secs(10))
    }

    fn fail_runner(output: &str) -> TestRunner {
        TestRunner::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("printf {output} >&2; exit 1"),
            ],
            Duration::from_secs(10),
        )
    }

    fn crash_runner() -> TestRunner {
        TestRunner::new(
            vec!["definitely-not-a-real-binary-xyz".to_string()],
            Duration::from_secs(10),
        )
    }

    struct Fixture {
        store: Arc<ProposalStore>,
        mirror: Arc<SourceMirror>,
        publisher: Arc<RecordingPublisher>,
        learning: Arc<TallySink>,
        gate: VerificationGate,
    }

    fn fixture(runner: TestRunner, failing_publisher: bool) -> Fixture {
        let store = Arc::new(ProposalStore::new(100));
        let mirror = scratch_mirror();
        let publisher = RecordingPublisher::new(failing_publisher);
        let learning = Arc::new(TallySink::new());
        let gate = VerificationGate::new(
            store.clone(),
            mirror.clone(),
            runner,
            publisher.clone(),
            EventBus::default(),
            learning.clone(),
        );
        Fixture {
            store,
            mirror,
            publisher,
            learning,
            gate,
        }
    }

    async fn approved_proposal(store: &ProposalStore, path: &str, code_after: &str) -> Proposal {
        let p = store
            .create(Proposal::new(
                ReviewerKind::Optimizer,
                path.to_string(),
                "before".to_string(),
                code_after.to_string(),
                "change".to_string(),
                0.8,
            ))
            .await
            .unwrap();
        store
            .transition(
                p.id,
                ProposalStatus::Approved,
                TransitionMetadata::with_reason("approved in test"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn passing_proposal_is_applied_and_mirror_updated() {
        let f = fixture(pass_runner(), false);
        let p = approved_proposal(&f.store, "lib/a.dart", "X").await;

        f.gate.reconcile().await.unwrap();

        let finished = f.store.get(p.id).await.unwrap();
        assert_eq!(finished.status, ProposalStatus::Applied);
        assert!(finished.result.as_deref().unwrap().contains("example.com"));
        assert_eq!(finished.test_status, Some(TestStatus::Passed));
        assert_eq!(f.mirror.read_file("lib/a.dart").await.unwrap(), "X");
        assert_eq!(f.publisher.call_count().await, 1);
        assert_eq!(
            f.learning.tally(ReviewerKind::Optimizer).await.applied,
            1
        );
    }

    #[tokio::test]
    async fn failing_proposal_records_output_and_never_publishes() {
        let f = fixture(fail_runner("E1"), false);
        let p = approved_proposal(&f.store, "lib/a.dart", "X").await;

        f.gate.reconcile().await.unwrap();

        let finished = f.store.get(p.id).await.unwrap();
        assert_eq!(finished.status, ProposalStatus::TestFailed);
        assert_eq!(finished.test_output.as_deref(), Some("E1"));
        assert_eq!(f.publisher.call_count().await, 0);
        assert_eq!(
            f.learning
                .tally(ReviewerKind::Optimizer)
                .await
                .rejected_by_test,
            1
        );
    }

    #[tokio::test]
    async fn runner_crash_leaves_proposal_approved_for_retry() {
        let f = fixture(crash_runner(), false);
        let p = approved_proposal(&f.store, "lib/a.dart", "X").await;

        let report = f.gate.reconcile().await.unwrap();
        assert_eq!(report.inconclusive, 1);

        let retained = f.store.get(p.id).await.unwrap();
        assert_eq!(retained.status, ProposalStatus::Approved);
        assert_eq!(f.publisher.call_count().await, 0);

        // The next pass picks it up again
        let report = f.gate.reconcile().await.unwrap();
        assert_eq!(report.examined, 1);
    }

    #[tokio::test]
    async fn runner_timeout_counts_as_inconclusive() {
        let f = fixture(
            TestRunner::new(
                vec!["sleep".to_string(), "5".to_string()],
                Duration::from_millis(100),
            ),
            false,
        );
        let p = approved_proposal(&f.store, "lib/a.dart", "X").await;

        let report = f.gate.reconcile().await.unwrap();
        assert_eq!(report.inconclusive, 1);
        assert_eq!(
            f.store.get(p.id).await.unwrap().status,
            ProposalStatus::Approved
        );
    }

    #[tokio::test]
    async fn escaping_target_is_rejected_without_testing() {
        let f = fixture(pass_runner(), false);
        let p = approved_proposal(&f.store, "../evil.dart", "X").await;

        let report = f.gate.reconcile().await.unwrap();
        assert_eq!(report.rejected, 1);

        let rejected = f.store.get(p.id).await.unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(f.publisher.call_count().await, 0);
    }

    #[tokio::test]
    async fn terminal_proposals_are_not_touched_again() {
        let f = fixture(pass_runner(), false);
        let p = approved_proposal(&f.store, "lib/a.dart", "X").await;

        f.gate.reconcile().await.unwrap();
        assert_eq!(f.publisher.call_count().await, 1);

        // Overwrite the mirror file to detect any further writes
        f.mirror
            .write_candidate("lib/a.dart", "sentinel")
            .await
            .unwrap();

        let report = f.gate.reconcile().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(report.applied, 0);
        assert_eq!(f.publisher.call_count().await, 1, "no duplicate publish");
        assert_eq!(f.mirror.read_file("lib/a.dart").await.unwrap(), "sentinel");
        assert_eq!(
            f.store.get(p.id).await.unwrap().status,
            ProposalStatus::Applied
        );
    }

    #[tokio::test]
    async fn publish_failure_keeps_proposal_test_passed() {
        // Pass verification, but against an unreachable host
        let passing = fixture(pass_runner(), true);
        let p = approved_proposal(&passing.store, "lib/a.dart", "X").await;

        passing.gate.reconcile().await.unwrap();
        let stuck = passing.store.get(p.id).await.unwrap();
        assert_eq!(stuck.status, ProposalStatus::TestPassed);
        assert_eq!(passing.publisher.call_count().await, 1);

        // A later pass with a reachable host publishes without re-testing:
        // the runner would now fail, so reaching `applied` proves no re-run.
        let retry_publisher = RecordingPublisher::new(false);
        let retry_gate = VerificationGate::new(
            passing.store.clone(),
            passing.mirror.clone(),
            fail_runner("would-fail-if-retested"),
            retry_publisher.clone(),
            EventBus::default(),
            Arc::new(TallySink::new()),
        );

        let report = retry_gate.reconcile().await.unwrap();
        assert_eq!(report.publish_retries, 1);
        let applied = passing.store.get(p.id).await.unwrap();
        assert_eq!(applied.status, ProposalStatus::Applied);
        assert!(applied.result.is_some());
        assert_eq!(retry_publisher.call_count().await, 1);
    }

    #[tokio::test]
    async fn each_proposal_is_tested_at_most_once_per_pass() {
        let f = fixture(
            TestRunner::new(
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "echo run >> runner-invocations".to_string(),
                ],
                Duration::from_secs(10),
            ),
            false,
        );
        approved_proposal(&f.store, "lib/a.dart", "X").await;

        f.gate.reconcile().await.unwrap();

        let invocations = f.mirror.read_file("runner-invocations").await.unwrap();
        assert_eq!(invocations.lines().count(), 1);
    }

    #[tokio::test]
    async fn events_trace_the_verification_lifecycle() {
        let store = Arc::new(ProposalStore::new(100));
        let mirror = scratch_mirror();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let gate = VerificationGate::new(
            store.clone(),
            mirror,
            pass_runner(),
            RecordingPublisher::new(false),
            events,
            Arc::new(TallySink::new()),
        );
        approved_proposal(&store, "lib/a.dart", "X").await;

        gate.reconcile().await.unwrap();

        let kinds: Vec<EventKind> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TestStarted,
                EventKind::TestFinished,
                EventKind::Applied
            ]
        );
    }
}
