//! Hosting platform boundary.
//!
//! Pipelines talk to [`HostingPlatform`]; `GitHubPlatform` implements it over
//! the REST v3 API and `InMemoryPlatform` backs tests.

pub mod github;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

pub use github::GitHubPlatform;
pub use memory::InMemoryPlatform;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
}

/// A pull request, or the platform's equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    /// Tip of the head branch; CI checks are reported against it
    pub head_sha: String,
    pub base_branch: String,
}

/// Parameters for opening a change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    /// Any state this client does not know about; treated as not finished
    #[serde(other)]
    Pending,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Queued => "queued",
            CheckStatus::InProgress => "in_progress",
            CheckStatus::Completed => "completed",
            CheckStatus::Pending => "pending",
        }
    }
}

/// One CI check on the head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    /// `success`, `failure`, `neutral`, `skipped`, ... once completed
    pub conclusion: Option<String>,
    pub url: Option<String>,
}

impl CheckRun {
    pub fn is_pending(&self) -> bool {
        self.status != CheckStatus::Completed
    }

    /// Completed with a conclusion that does not count against the change.
    pub fn is_passing(&self) -> bool {
        !self.is_pending()
            && matches!(
                self.conclusion.as_deref(),
                Some("success") | Some("skipped") | Some("neutral")
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Operations the pipelines need from the hosting platform. Each instance is
/// bound to one repository.
#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// `owner/name` this instance talks to.
    fn repository(&self) -> &str;

    async fn fetch_issue(&self, number: u64) -> Result<Issue, PlatformError>;

    async fn fetch_change_request(&self, number: u64) -> Result<ChangeRequest, PlatformError>;

    async fn open_change_request(
        &self,
        request: &NewChangeRequest,
    ) -> Result<ChangeRequest, PlatformError>;

    /// Unified diff of the change request against its base.
    async fn fetch_diff(&self, number: u64) -> Result<String, PlatformError>;

    async fn fetch_check_statuses(&self, head_sha: &str) -> Result<Vec<CheckRun>, PlatformError>;

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), PlatformError>;

    /// Comments in chronological order.
    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, PlatformError>;

    async fn count_commits(&self, number: u64) -> Result<u32, PlatformError>;

    /// Paths touched by the change request.
    async fn changed_files(&self, number: u64) -> Result<Vec<String>, PlatformError>;

    async fn default_branch(&self) -> Result<String, PlatformError>;
}
