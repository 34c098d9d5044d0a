//! Typed error hierarchy for appforge.
//!
//! One enum per subsystem:
//! - `StoreError`: job persistence and state-machine guards
//! - `StageError`: one pipeline stage's external call
//! - `LaunchError`: request validation and job creation
//! - `ClientError`: HTTP client used by pollers and the CLI
//! - `ConfigError`: loading `appforge.toml`

use appforge_common::{JobId, JobStatus};
use thiserror::Error;

/// Errors from the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Build job {id} not found")]
    NotFound { id: JobId },

    #[error("Build job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Build job {id} already has a {field}; it cannot be replaced")]
    ArtifactFrozen { id: JobId, field: &'static str },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    #[error("Failed to encode build log: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Database task failed: {0}")]
    TaskFailed(String),
}

/// Errors from a single stage call. Always recovered by the runner and
/// recorded in the build log; never propagated to the job's creator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StageError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("No specification available to build from")]
    MissingSpec,

    #[error("No generated code available to deploy")]
    MissingCode,

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned an empty response")]
    EmptyResponse,

    #[error("Invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

/// Errors rejected by the job launcher before any job exists.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Prompt is too long ({len} characters, limit {max})")]
    PromptTooLong { len: usize, max: usize },

    #[error("Owner id is required")]
    MissingOwner,

    #[error("Build runner is not accepting jobs")]
    RunnerUnavailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LaunchError {
    /// Validation failures are the caller's fault; everything else is ours.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPrompt | Self::PromptTooLong { .. } | Self::MissingOwner
        )
    }
}

/// Errors from the HTTP client side.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Build job {0} not found")]
    NotFound(String),

    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid server URL '{0}'")]
    InvalidUrl(String),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
