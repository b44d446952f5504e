//! Reviewer roles and candidate suggestion adapters
//!
//! A reviewer is a pluggable role that proposes file-level changes on its
//! own cadence. Each role is registered once with a file selector, a
//! per-cycle cap and a suggestion engine; the scheduler looks the role up
//! by kind instead of dispatching on strings.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReviewerConfig;
use crate::error::AppError;

/// Reviewer roles known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewerKind {
    /// Performance and logging cleanups
    Optimizer,
    /// Source hygiene and safety checks
    Auditor,
    /// Exploratory rewrites
    Experimenter,
}

impl ReviewerKind {
    pub const ALL: [ReviewerKind; 3] = [
        ReviewerKind::Optimizer,
        ReviewerKind::Auditor,
        ReviewerKind::Experimenter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewerKind::Optimizer => "optimizer",
            ReviewerKind::Auditor => "auditor",
            ReviewerKind::Experimenter => "experimenter",
        }
    }

    pub fn parse(s: &str) -> Option<ReviewerKind> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl std::fmt::Display for ReviewerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate deciding which mirror files a reviewer looks at
#[derive(Debug, Clone)]
pub struct FileSelector {
    extensions: Vec<String>,
}

impl FileSelector {
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    pub fn matches(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }
}

/// A candidate change produced by a suggestion engine
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// Proposed file content
    pub code_after: String,
    /// Rationale shown alongside the proposal
    pub reason: String,
    /// Engine confidence, clamped downstream to [0, 1]
    pub confidence: f64,
}

/// Opaque suggestion producer.
///
/// Implementations must be thread-safe (Send + Sync) so a single engine
/// can serve every cycle of its reviewer. Returning `Ok(None)` means the
/// engine has nothing to propose for this file; errors abort only the
/// current file, never the batch.
#[async_trait]
pub trait SuggestionEngine: Send + Sync {
    async fn suggest(&self, path: &str, code: &str) -> Result<Option<Suggestion>, AppError>;
}

/// Default engine: a fixed set of pattern rewrites applied to the file.
///
/// Stands in for an external suggestion producer; each reviewer role gets
/// its own rule set.
pub struct RuleBasedEngine {
    rules: Vec<(Regex, String)>,
    reason: String,
    confidence: f64,
}

impl RuleBasedEngine {
    pub fn new(
        rules: Vec<(Regex, String)>,
        reason: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            rules,
            reason: reason.into(),
            confidence,
        }
    }
}

#[async_trait]
impl SuggestionEngine for RuleBasedEngine {
    async fn suggest(&self, _path: &str, code: &str) -> Result<Option<Suggestion>, AppError> {
        let mut rewritten = code.to_string();
        for (pattern, replacement) in &self.rules {
            rewritten = pattern
                .replace_all(&rewritten, replacement.as_str())
                .into_owned();
        }
        if rewritten == code {
            return Ok(None);
        }
        Ok(Some(Suggestion {
            code_after: rewritten,
            reason: self.reason.clone(),
            confidence: self.confidence,
        }))
    }
}

/// One registered reviewer role
#[derive(Clone)]
pub struct ReviewerSpec {
    pub kind: ReviewerKind,
    /// Time between generation cycles
    pub cadence: Duration,
    pub selector: FileSelector,
    /// Upper bound on files considered in one cycle
    pub file_cap: usize,
    pub engine: Arc<dyn SuggestionEngine>,
}

/// Reviewer table, built once at startup and looked up by kind
pub struct ReviewerRegistry {
    specs: Vec<ReviewerSpec>,
}

impl ReviewerRegistry {
    /// Build the default reviewer table from configuration.
    pub fn from_config(configs: &[ReviewerConfig]) -> Result<Self, AppError> {
        let mut specs = Vec::with_capacity(configs.len());
        for cfg in configs {
            let kind = ReviewerKind::parse(&cfg.name)
                .ok_or_else(|| AppError::Config(format!("Unknown reviewer: {}", cfg.name)))?;
            specs.push(ReviewerSpec {
                kind,
                cadence: Duration::from_secs(cfg.cadence_secs),
                selector: FileSelector::new(cfg.extensions.clone()),
                file_cap: cfg.file_cap,
                engine: Self::default_engine(kind)?,
            });
        }
        Ok(Self { specs })
    }

    fn default_engine(kind: ReviewerKind) -> Result<Arc<dyn SuggestionEngine>, AppError> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| AppError::Config(format!("Bad engine pattern: {e}")))
        };
        let engine: Arc<dyn SuggestionEngine> = match kind {
            ReviewerKind::Optimizer => Arc::new(RuleBasedEngine::new(
                vec![(compile(r"\bprint\(")?, "debugPrint(".to_string())],
                "Replace debug print statements with debugPrint",
                0.8,
            )),
            ReviewerKind::Auditor => Arc::new(RuleBasedEngine::new(
                vec![(compile(r"[ \t]+\n")?, "\n".to_string())],
                "Strip trailing whitespace",
                0.9,
            )),
            ReviewerKind::Experimenter => Arc::new(RuleBasedEngine::new(
                vec![(compile(r"\n{3,}")?, "\n\n".to_string())],
                "Collapse runs of blank lines",
                0.6,
            )),
        };
        Ok(engine)
    }

    pub fn get(&self, kind: ReviewerKind) -> Option<&ReviewerSpec> {
        self.specs.iter().find(|s| s.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReviewerSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
