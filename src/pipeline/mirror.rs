//! Source mirror manager
//!
//! Keeps the single local working copy of the remote source tree
//! synchronized and owns every write into it. Sync and file writes are
//! serialized through one mutex; concurrent unsynchronized pulls on the
//! same working copy are undefined behavior and must never happen.

use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::AppError;
use crate::reviewer::FileSelector;

/// The shared local working copy
pub struct SourceMirror {
    /// Clone URL; a detached mirror has none and is never synced
    remote: Option<String>,
    root: PathBuf,
    /// Serializes clone/pull, candidate writes and commits
    op_lock: Mutex<()>,
    last_synced: RwLock<Option<DateTime<Utc>>>,
}

impl SourceMirror {
    pub fn new(remote: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            remote: Some(remote.into()),
            root: root.into(),
            op_lock: Mutex::new(()),
            last_synced: RwLock::new(None),
        }
    }

    /// A mirror over a pre-provisioned working copy with no remote.
    pub fn detached(root: impl Into<PathBuf>) -> Self {
        Self {
            remote: None,
            root: root.into(),
            op_lock: Mutex::new(()),
            last_synced: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn last_synced(&self) -> Option<DateTime<Utc>> {
        *self.last_synced.read().await
    }

    /// Clone the remote if the working copy is absent, otherwise pull.
    ///
    /// Failures abort only the calling cycle; the next scheduled
    /// invocation retries.
    pub async fn ensure_up_to_date(&self) -> Result<(), AppError> {
        let _guard = self.op_lock.lock().await;

        let Some(remote) = &self.remote else {
            if !self.root.exists() {
                return Err(AppError::Sync(format!(
                    "Detached mirror path {} does not exist",
                    self.root.display()
                )));
            }
            debug!(path = %self.root.display(), "Detached mirror, skipping sync");
            *self.last_synced.write().await = Some(Utc::now());
            return Ok(());
        };

        if self.root.exists() {
            debug!(path = %self.root.display(), "Pulling source mirror");
            run_git(Some(&self.root), &["pull", "--ff-only"]).await?;
        } else {
            info!(remote = %remote, path = %self.root.display(), "Cloning source mirror");
            let root = self.root.to_string_lossy().into_owned();
            run_git(None, &["clone", remote.as_str(), root.as_str()]).await?;
        }

        *self.last_synced.write().await = Some(Utc::now());
        Ok(())
    }

    /// Resolve a proposal target against the mirror root.
    ///
    /// The single canonicalization routine for the whole pipeline:
    /// absolute paths, `..` components and symlinked escapes are all
    /// refused.
    pub fn resolve_target(&self, rel: &str) -> Result<PathBuf, AppError> {
        let candidate = Path::new(rel);
        if candidate.as_os_str().is_empty() || candidate.is_absolute() {
            return Err(AppError::PathEscape(rel.to_string()));
        }
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(AppError::PathEscape(rel.to_string())),
            }
        }

        let joined = self.root.join(candidate);

        // Until the mirror is cloned there is nothing to symlink-escape
        // through; the lexical checks above still hold.
        if !self.root.exists() {
            return Ok(joined);
        }

        // Walk up to the nearest existing ancestor and make sure it still
        // lives under the root once symlinks are resolved.
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let mut probe = joined.as_path();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        if probe.exists() {
            let canonical = probe.canonicalize()?;
            if !canonical.starts_with(&root) {
                return Err(AppError::PathEscape(rel.to_string()));
            }
        }

        Ok(joined)
    }

    /// Read a mirror file.
    pub async fn read_file(&self, rel: &str) -> Result<String, AppError> {
        let path = self.resolve_target(rel)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    /// Write a candidate into the mirror, creating parent directories as
    /// needed. The whole write happens under the mirror lock so two
    /// writers can never interleave.
    pub async fn write_candidate(&self, rel: &str, content: &str) -> Result<PathBuf, AppError> {
        let path = self.resolve_target(rel)?;
        let _guard = self.op_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// Commit a single mirror file. `git commit` reporting a clean tree is
    /// treated as success so publish retries do not trip over an earlier
    /// commit that already landed.
    pub async fn commit_file(&self, rel: &str, message: &str) -> Result<(), AppError> {
        let _guard = self.op_lock.lock().await;
        run_git(Some(&self.root), &["add", rel])
            .await
            .map_err(publish_error)?;
        match run_git(Some(&self.root), &["commit", "-m", message]).await {
            Ok(_) => Ok(()),
            Err(AppError::Sync(msg)) if msg.contains("nothing to commit") => Ok(()),
            Err(e) => Err(publish_error(e)),
        }
    }

    /// Select up to `cap` files matching the selector, as paths relative
    /// to the mirror root. No ordering guarantee.
    pub fn select_files(
        &self,
        selector: &FileSelector,
        cap: usize,
    ) -> Result<Vec<String>, AppError> {
        let mut matches = Vec::new();
        collect_files(&self.root, &self.root, selector, cap, &mut matches)?;
        Ok(matches)
    }
}

fn collect_files(
    root: &Path,
    dir: &Path,
    selector: &FileSelector,
    cap: usize,
    matches: &mut Vec<String>,
) -> Result<(), AppError> {
    if matches.len() >= cap || !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        if matches.len() >= cap {
            break;
        }
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue; // .git and friends
        }
        if path.is_dir() {
            collect_files(root, &path, selector, cap, matches)?;
        } else if selector.matches(&path) {
            if let Ok(rel) = path.strip_prefix(root) {
                matches.push(rel.to_string_lossy().into_owned());
            }
        }
    }
    Ok(())
}

fn publish_error(e: AppError) -> AppError {
    match e {
        AppError::Sync(msg) => AppError::Publish(msg),
        other => other,
    }
}

async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<String, AppError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .args(args)
        .output()
        .await
        .map_err(|e| AppError::Sync(format!("git {}: {}", args.join(" "), e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        Err(AppError::Sync(format!(
            "git {} failed: {}{}",
            args.join(" "),
            stderr.trim(),
            stdout.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_mirror() -> SourceMirror {
        let root = std::env::temp_dir().join(format!("mirror-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();
        SourceMirror::detached(root)
    }

    #[tokio::test]
    async fn detached_mirror_sync_is_a_no_op() {
        let mirror = scratch_mirror();
        assert!(mirror.last_synced().await.is_none());
        mirror.ensure_up_to_date().await.unwrap();
        assert!(mirror.last_synced().await.is_some());
    }

    #[tokio::test]
    async fn detached_mirror_sync_requires_the_path() {
        let mirror = SourceMirror::detached(
            std::env::temp_dir().join(format!("missing-{}", Uuid::new_v4())),
        );
        assert!(matches!(
            mirror.ensure_up_to_date().await,
            Err(AppError::Sync(_))
        ));
    }

    #[test]
    fn resolve_accepts_paths_inside_the_root() {
        let mirror = scratch_mirror();
        let resolved = mirror.resolve_target("lib/a.dart").unwrap();
        assert!(resolved.starts_with(mirror.root()));
    }

    #[test]
    fn resolve_rejects_escapes() {
        let mirror = scratch_mirror();
        assert!(matches!(
            mirror.resolve_target("../outside.dart"),
            Err(AppError::PathEscape(_))
        ));
        assert!(matches!(
            mirror.resolve_target("lib/../../outside.dart"),
            Err(AppError::PathEscape(_))
        ));
        assert!(matches!(
            mirror.resolve_target("/etc/passwd"),
            Err(AppError::PathEscape(_))
        ));
        assert!(matches!(
            mirror.resolve_target(""),
            Err(AppError::PathEscape(_))
        ));
    }

    #[tokio::test]
    async fn write_candidate_creates_parents_and_writes() {
        let mirror = scratch_mirror();
        mirror
            .write_candidate("lib/src/deep/a.dart", "void main() {}")
            .await
            .unwrap();
        let content = mirror.read_file("lib/src/deep/a.dart").await.unwrap();
        assert_eq!(content, "void main() {}");
    }

    #[tokio::test]
    async fn concurrent_writers_never_interleave() {
        let mirror = std::sync::Arc::new(scratch_mirror());
        let a = "A".repeat(64 * 1024);
        let b = "B".repeat(64 * 1024);

        let m1 = mirror.clone();
        let c1 = a.clone();
        let w1 = tokio::spawn(async move { m1.write_candidate("lib/a.dart", &c1).await });
        let m2 = mirror.clone();
        let c2 = b.clone();
        let w2 = tokio::spawn(async move { m2.write_candidate("lib/a.dart", &c2).await });

        w1.await.unwrap().unwrap();
        w2.await.unwrap().unwrap();

        let result = mirror.read_file("lib/a.dart").await.unwrap();
        assert!(
            result == a || result == b,
            "mirror file must be one writer's complete content"
        );
    }

    #[tokio::test]
    async fn select_files_respects_selector_and_cap() {
        let mirror = scratch_mirror();
        mirror.write_candidate("lib/a.dart", "a").await.unwrap();
        mirror.write_candidate("lib/b.dart", "b").await.unwrap();
        mirror.write_candidate("lib/c.rs", "c").await.unwrap();
        mirror.write_candidate("README.md", "d").await.unwrap();

        let selector = FileSelector::new(vec!["dart".to_string()]);
        let all = mirror.select_files(&selector, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|p| p.ends_with(".dart")));

        let capped = mirror.select_files(&selector, 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[tokio::test]
    async fn hidden_directories_are_skipped() {
        let mirror = scratch_mirror();
        std::fs::create_dir_all(mirror.root().join(".git")).unwrap();
        std::fs::write(mirror.root().join(".git/config.dart"), "x").unwrap();
        mirror.write_candidate("lib/a.dart", "a").await.unwrap();

        let selector = FileSelector::new(vec!["dart".to_string()]);
        let files = mirror.select_files(&selector, 10).unwrap();
        assert_eq!(files, vec!["lib/a.dart".to_string()]);
    }
}
