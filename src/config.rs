//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for container deployments
            port: 3000,
        }
    }
}

/// Source mirror configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    /// Remote repository reference (clone URL)
    pub remote: String,
    /// Local working-copy path
    pub path: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            remote: String::new(),
            path: "./mirror".to_string(),
        }
    }
}

/// Timer cadences for the scheduler
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between reconciliation passes
    pub reconcile_interval_secs: u64,
    /// Seconds between housekeeping sweeps
    pub housekeeping_interval_secs: u64,
    /// Hours a terminal proposal is retained before pruning
    pub retention_hours: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 120,
            housekeeping_interval_secs: 3600,
            retention_hours: 72,
        }
    }
}

/// Verification gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Test-runner command, whitespace-split (program + args)
    pub test_command: Vec<String>,
    /// Upper bound on one runner invocation
    pub runner_timeout_secs: u64,
    /// Optional publish command producing a change-request URL on stdout
    pub publish_command: Option<Vec<String>>,
    /// Creation is refused once this many proposals are pending
    pub pending_cap: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            test_command: vec!["dart".to_string(), "test".to_string()],
            runner_timeout_secs: 900,
            publish_command: None,
            pending_cap: 40,
        }
    }
}

/// Per-reviewer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewerConfig {
    pub name: String,
    pub cadence_secs: u64,
    pub extensions: Vec<String>,
    pub file_cap: usize,
}

impl ReviewerConfig {
    /// The built-in reviewer roster with its default cadences and caps.
    pub fn defaults() -> Vec<ReviewerConfig> {
        vec![
            ReviewerConfig {
                name: "optimizer".to_string(),
                cadence_secs: 600,
                extensions: vec!["dart".to_string()],
                file_cap: 5,
            },
            ReviewerConfig {
                name: "auditor".to_string(),
                cadence_secs: 1200,
                extensions: vec!["dart".to_string(), "yaml".to_string()],
                file_cap: 3,
            },
            ReviewerConfig {
                name: "experimenter".to_string(),
                cadence_secs: 1800,
                extensions: vec!["dart".to_string()],
                file_cap: 3,
            },
        ]
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub mirror: MirrorConfig,
    pub scheduler: SchedulerConfig,
    pub gate: GateConfig,
    pub reviewers: Vec<ReviewerConfig>,
    pub cors: CorsConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let remote = std::env::var("MIRROR_REMOTE")
            .map_err(|_| ConfigError::MissingVar("MIRROR_REMOTE".to_string()))?;
        Self::validate_remote(&remote)?;

        let mirror = MirrorConfig {
            remote,
            path: std::env::var("MIRROR_PATH")
                .unwrap_or_else(|_| MirrorConfig::default().path),
        };

        let scheduler = SchedulerConfig {
            reconcile_interval_secs: env_parsed(
                "RECONCILE_INTERVAL_SECS",
                SchedulerConfig::default().reconcile_interval_secs,
            ),
            housekeeping_interval_secs: env_parsed(
                "HOUSEKEEPING_INTERVAL_SECS",
                SchedulerConfig::default().housekeeping_interval_secs,
            ),
            retention_hours: env_parsed(
                "RETENTION_HOURS",
                SchedulerConfig::default().retention_hours,
            ),
        };

        let gate = GateConfig {
            test_command: std::env::var("TEST_COMMAND")
                .ok()
                .map(|s| split_command(&s))
                .unwrap_or_else(|| GateConfig::default().test_command),
            runner_timeout_secs: env_parsed(
                "RUNNER_TIMEOUT_SECS",
                GateConfig::default().runner_timeout_secs,
            ),
            publish_command: std::env::var("PUBLISH_COMMAND")
                .ok()
                .map(|s| split_command(&s))
                .filter(|c| !c.is_empty()),
            pending_cap: env_parsed("PENDING_CAP", GateConfig::default().pending_cap),
        };

        if gate.test_command.is_empty() {
            return Err(ConfigError::InvalidValue(
                "TEST_COMMAND must not be empty".to_string(),
            ));
        }

        let reviewers = Self::load_reviewers();

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        Ok(Self {
            server,
            mirror,
            scheduler,
            gate,
            reviewers,
            cors,
        })
    }

    /// Per-reviewer cadence and cap overrides, e.g. `OPTIMIZER_CADENCE_SECS`
    /// and `AUDITOR_FILE_CAP`.
    fn load_reviewers() -> Vec<ReviewerConfig> {
        ReviewerConfig::defaults()
            .into_iter()
            .map(|mut cfg| {
                let prefix = cfg.name.to_uppercase();
                cfg.cadence_secs =
                    env_parsed(&format!("{prefix}_CADENCE_SECS"), cfg.cadence_secs);
                cfg.file_cap = env_parsed(&format!("{prefix}_FILE_CAP"), cfg.file_cap);
                cfg
            })
            .collect()
    }

    /// Accept URLs, scp-style refs and local paths; refuse the obviously broken.
    fn validate_remote(remote: &str) -> Result<(), ConfigError> {
        if remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "MIRROR_REMOTE must not be empty".to_string(),
            ));
        }
        if remote.contains("://") && url::Url::parse(remote).is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "MIRROR_REMOTE is not a valid URL: {remote}"
            )));
        }
        Ok(())
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(|s| s.to_string()).collect()
}
