//! Typed error hierarchy for patchwright.
//!
//! Four top-level enums cover the subsystems:
//! - `PipelineError`: task-level failures surfaced by the controller and pipelines
//! - `OracleError`: reasoning-service call failures, split into transient and permanent
//! - `ApplyError`: patch materialization failures inside a scoped working copy
//! - `PlatformError`: hosting platform API and push failures

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::controller::AttemptRecord;

/// Errors surfaced by a task run.
///
/// Only `IterationsExhausted`, `Filesystem` and `Cancelled` ever escape the
/// feedback loop; the remaining loop-level kinds are recovered inside the
/// controller and turned into attempt diagnostics.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("reasoning service error: {0}")]
    TransientService(#[source] OracleError),

    #[error("unparseable response: {0}")]
    UnparseablePatch(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("{tool} unavailable: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Gave up after {total} attempt(s) without an acceptable patch")]
    IterationsExhausted {
        total: u32,
        attempts: Vec<AttemptRecord>,
    },

    #[error("Filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task cancelled")]
    Cancelled,

    #[error("Git error: {0}")]
    Git(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error marks the task as failed (as opposed to a loop-local
    /// condition the controller recovers from).
    pub fn is_task_failure(&self) -> bool {
        !matches!(
            self,
            Self::TransientService(_)
                | Self::UnparseablePatch(_)
                | Self::ValidationFailure(_)
                | Self::ToolUnavailable { .. }
        )
    }
}

impl From<ApplyError> for PipelineError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Io { path, source } => Self::Filesystem { path, source },
            conflict => Self::ValidationFailure(conflict.to_string()),
        }
    }
}

/// Errors from a single reasoning-service call.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("request rejected (HTTP {status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("malformed service response: {0}")]
    Decode(String),

    #[error("reasoning client not configured: {0}")]
    NotConfigured(String),
}

impl OracleError {
    /// Transient errors are retried at the call site; everything else counts
    /// as an attempt failure immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Server { .. } | Self::Connection(_)
        )
    }
}

/// Errors from materializing a candidate patch.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("search block not found in {path}:\n{search}")]
    SearchNotFound { path: String, search: String },

    #[error("search block matches {count} times in {path}; ambiguous update")]
    AmbiguousSearch { path: String, count: usize },

    #[error("hunk {hunk} does not apply to {path}: {reason}")]
    HunkMismatch {
        path: String,
        hunk: usize,
        reason: String,
    },

    #[error("{path} does not exist; cannot apply an incremental edit to it")]
    MissingFile { path: String },

    #[error("refusing to touch path outside the working copy: {path}")]
    UnsafePath { path: String },

    #[error("refusing to write credential file {path}")]
    ProtectedPath { path: String },

    #[error("{path} is not an editable text file: {reason}")]
    NotATextFile { path: String, reason: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApplyError {
    /// Conflicts are the oracle's fault and feed back into the next prompt;
    /// I/O errors are ours and abort the task.
    pub fn is_conflict(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }
}

/// Errors from the hosting platform boundary.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("missing credentials: {0}")]
    MissingToken(String),

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("a change request already exists for branch {0}")]
    AlreadyExists(String),

    #[error("git push failed: {0}")]
    Push(String),
}

impl PlatformError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Request { source, .. } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}
