//! Publisher
//!
//! Commits verified changes in the mirror and opens an upstream change
//! request through a pluggable host adapter. Publishing never re-tests:
//! a failure leaves the proposal `test-passed` so a later pass retries
//! the publish step alone.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;
use tracing::info;

use crate::error::AppError;
use crate::pipeline::mirror::SourceMirror;
use crate::proposal::Proposal;

/// Upstream change-request adapter.
///
/// Implementations return a stable reference (typically a URL) for the
/// opened change request.
#[async_trait]
pub trait ChangeHost: Send + Sync {
    async fn open_change_request(&self, proposal: &Proposal) -> Result<String, AppError>;
}

/// Host adapter driven by an external command.
///
/// The command receives the proposal through `PROPOSAL_*` environment
/// variables and must print the change-request reference on stdout.
pub struct CommandChangeHost {
    command: Vec<String>,
}

impl CommandChangeHost {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ChangeHost for CommandChangeHost {
    async fn open_change_request(&self, proposal: &Proposal) -> Result<String, AppError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| AppError::Publish("Publish command is empty".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .env("PROPOSAL_ID", proposal.id.to_string())
            .env("PROPOSAL_PATH", &proposal.target_path)
            .env("PROPOSAL_REVIEWER", proposal.reviewer.as_str())
            .env("PROPOSAL_REASON", &proposal.reason)
            .output()
            .await
            .map_err(|e| AppError::Publish(format!("{program}: {e}")))?;

        if !output.status.success() {
            return Err(AppError::Publish(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let reference = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if reference.is_empty() {
            return Err(AppError::Publish(
                "Publish command produced no change-request reference".to_string(),
            ));
        }
        Ok(reference)
    }
}

/// Fallback host used when no publish command is configured: derives a
/// deterministic reference from the remote and the proposal id.
pub struct ReferenceChangeHost {
    remote: String,
}

impl ReferenceChangeHost {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl ChangeHost for ReferenceChangeHost {
    async fn open_change_request(&self, proposal: &Proposal) -> Result<String, AppError> {
        let base = self.remote.trim_end_matches(".git");
        Ok(format!("{}#{}", base, &proposal.id.simple().to_string()[..8]))
    }
}

/// Publishes a verified proposal upstream.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Commit the already-written change and open a change request,
    /// returning its reference.
    async fn publish(&self, proposal: &Proposal) -> Result<String, AppError>;
}

/// Default publisher: commits through the mirror, then calls the host.
pub struct GitPublisher {
    mirror: Arc<SourceMirror>,
    host: Arc<dyn ChangeHost>,
}

impl GitPublisher {
    pub fn new(mirror: Arc<SourceMirror>, host: Arc<dyn ChangeHost>) -> Self {
        Self { mirror, host }
    }
}

#[async_trait]
impl Publisher for GitPublisher {
    async fn publish(&self, proposal: &Proposal) -> Result<String, AppError> {
        let message = format!(
            "{}: {} ({})",
            proposal.reviewer, proposal.reason, proposal.target_path
        );
        self.mirror
            .commit_file(&proposal.target_path, &message)
            .await?;

        let reference = self.host.open_change_request(proposal).await?;
        info!(
            proposal = %proposal.id,
            reference = %reference,
            "🚀 Change request opened"
        );
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviewer::ReviewerKind;
    use uuid::Uuid;

    fn sample_proposal() -> Proposal {
        Proposal::new(
            ReviewerKind::Optimizer,
            "lib/a.dart".to_string(),
            "before".to_string(),
            "after".to_string(),
            "swap prints".to_string(),
            0.8,
        )
    }

    #[tokio::test]
    async fn reference_host_derives_a_stable_reference() {
        let host = ReferenceChangeHost::new("https://example.com/org/repo.git");
        let proposal = sample_proposal();
        let reference = host.open_change_request(&proposal).await.unwrap();
        assert!(reference.starts_with("https://example.com/org/repo#"));
        assert_eq!(
            reference,
            host.open_change_request(&proposal).await.unwrap()
        );
    }

    #[tokio::test]
    async fn command_host_reads_reference_from_stdout() {
        let host = CommandChangeHost::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo https://example.com/pr/7".to_string(),
        ]);
        let reference = host.open_change_request(&sample_proposal()).await.unwrap();
        assert_eq!(reference, "https://example.com/pr/7");
    }

    #[tokio::test]
    async fn command_host_failure_is_a_publish_error() {
        let host = CommandChangeHost::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "exit 3".to_string(),
        ]);
        let err = host
            .open_change_request(&sample_proposal())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Publish(_)));
    }

    #[tokio::test]
    async fn command_host_requires_a_reference() {
        let host = CommandChangeHost::new(vec!["true".to_string()]);
        let err = host
            .open_change_request(&sample_proposal())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Publish(_)));
    }

    #[tokio::test]
    async fn git_publisher_commits_then_opens_a_change_request() {
        // A real repository so the commit step has something to work with
        let root = std::env::temp_dir().join(format!("publisher-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.email", "pipeline@example.com"],
            vec!["config", "user.name", "pipeline"],
        ] {
            let status = std::process::Command::new("git")
                .args(&args)
                .current_dir(&root)
                .status()
                .unwrap();
            assert!(status.success());
        }

        let mirror = Arc::new(SourceMirror::detached(root));
        mirror.write_candidate("lib/a.dart", "after").await.unwrap();

        let publisher = GitPublisher::new(
            mirror,
            Arc::new(ReferenceChangeHost::new("https://example.com/repo.git")),
        );
        let reference = publisher.publish(&sample_proposal()).await.unwrap();
        assert!(reference.contains('#'));

        // Publishing again must tolerate the already-committed change
        let reference_again = publisher.publish(&sample_proposal()).await.unwrap();
        assert!(reference_again.contains('#'));
    }
}
