//! Turning an accepted patch into a commit, a pushed branch and a change
//! request.

use std::fmt::Write;
use std::sync::Arc;

use tracing::info;

use crate::controller::AcceptedPatch;
use crate::errors::PipelineError;
use crate::platform::{ChangeRequest, HostingPlatform, Issue, NewChangeRequest};
use crate::workspace::{CommitTarget, ScopedWorkspace, git};

/// What publishing did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// New branch pushed and change request opened
    Opened {
        change_request: ChangeRequest,
        sha: String,
    },
    /// Existing change request branch updated
    Updated { branch: String, sha: String },
    /// Committed locally; push and change request skipped
    DryRun { branch: String, sha: String },
}

pub struct ChangeRequestPublisher {
    platform: Arc<dyn HostingPlatform>,
    remote: String,
    base_branch: Option<String>,
    dry_run: bool,
}

impl ChangeRequestPublisher {
    pub fn new(
        platform: Arc<dyn HostingPlatform>,
        remote: &str,
        base_branch: Option<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            platform,
            remote: remote.to_string(),
            base_branch,
            dry_run,
        }
    }

    /// Commit to a fresh uniquely named branch, push it and open a change
    /// request against the base branch.
    pub async fn publish_fix(
        &self,
        issue: &Issue,
        accepted: &AcceptedPatch,
        workspace: &ScopedWorkspace,
    ) -> Result<PublishOutcome, PipelineError> {
        let branch = accepted.branch_seed.unique_branch_name();
        let title = format!("Fix issue #{}: {}", issue.number, issue.title);
        let sha = workspace.commit(
            &accepted.applied,
            &CommitTarget::NewBranch(branch.clone()),
            &title,
        )?;

        if self.dry_run {
            info!(branch = %branch, sha = %sha, "dry run: skipping push and change request");
            return Ok(PublishOutcome::DryRun { branch, sha });
        }

        git::push_branch(workspace.source_root(), &self.remote, &branch).await?;

        let base = match &self.base_branch {
            Some(base) => base.clone(),
            None => self.platform.default_branch().await?,
        };
        let request = NewChangeRequest {
            title,
            body: fix_body(issue, accepted),
            head: branch,
            base,
        };
        let change_request = self.platform.open_change_request(&request).await?;
        info!(number = change_request.number, url = %change_request.url, "change request opened");
        Ok(PublishOutcome::Opened {
            change_request,
            sha,
        })
    }

    /// Commit onto the already checked-out head branch of `change_request`
    /// and push it.
    pub async fn publish_revision(
        &self,
        change_request: &ChangeRequest,
        accepted: &AcceptedPatch,
        workspace: &ScopedWorkspace,
    ) -> Result<PublishOutcome, PipelineError> {
        let message = format!("Address feedback for PR #{}", change_request.number);
        let sha = workspace.commit(&accepted.applied, &CommitTarget::CurrentBranch, &message)?;
        let branch = change_request.head_branch.clone();

        if self.dry_run {
            info!(branch = %branch, sha = %sha, "dry run: skipping push");
            return Ok(PublishOutcome::DryRun { branch, sha });
        }

        git::push_branch(workspace.source_root(), &self.remote, &branch).await?;
        info!(branch = %branch, sha = %sha, "revision pushed");
        Ok(PublishOutcome::Updated { branch, sha })
    }

    /// Post `body` on change request `number` unless this is a dry run.
    pub async fn comment(&self, number: u64, body: &str) -> Result<bool, PipelineError> {
        if self.dry_run {
            info!(number, "dry run: skipping comment");
            return Ok(false);
        }
        self.platform.post_comment(number, body).await?;
        Ok(true)
    }
}

/// Change request description for an issue fix.
pub fn fix_body(issue: &Issue, accepted: &AcceptedPatch) -> String {
    let mut body = format!("Automated fix for issue #{}.\n\n", issue.number);
    if !issue.body.trim().is_empty() {
        let _ = writeln!(body, "{}\n", issue.body.trim());
    }

    let _ = writeln!(body, "### Changes\n");
    for file in &accepted.applied.files {
        let action = if file.deleted() {
            "deleted"
        } else if file.created() {
            "added"
        } else {
            "modified"
        };
        let _ = writeln!(body, "- `{}` ({})", file.path, action);
    }

    let _ = writeln!(
        body,
        "\nAccepted on attempt {} ({}).",
        accepted.attempt(),
        accepted.report.verdict
    );
    let warnings = accepted.report.warnings();
    if !warnings.is_empty() {
        let _ = writeln!(body, "\n<details>\n<summary>Validation warnings</summary>\n");
        for warning in warnings {
            let _ = writeln!(body, "- {}", warning);
        }
        let _ = writeln!(body, "\n</details>");
    }
    body
}
