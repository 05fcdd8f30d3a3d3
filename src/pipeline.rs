//! Task entry points: fix an issue, revise a change request, review a
//! change request.
//!
//! Each entry point fetches what it needs from the hosting platform, runs the
//! shared machinery and publishes the result. Dry runs stop before anything
//! is pushed, opened or posted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::clock::Clock;
use crate::config::PatchwrightConfig;
use crate::controller::{AcceptedPatch, ControllerSettings, FeedbackController};
use crate::errors::PipelineError;
use crate::oracle::ReasoningClient;
use crate::platform::{ChangeRequest, Comment, HostingPlatform};
use crate::publish::{ChangeRequestPublisher, PublishOutcome};
use crate::repo_map::extract_path_hints;
use crate::review::{
    CiSummary, Review, ReviewInput, ReviewSynthesizer, lint, linked_issue_number, render_comment,
};
use crate::task::Task;
use crate::validate::Validator;
use crate::workspace::{ScopedWorkspace, git};

/// Result of fixing an issue.
#[derive(Debug)]
pub struct FixReport {
    pub accepted: AcceptedPatch,
    pub outcome: PublishOutcome,
}

#[derive(Debug)]
pub enum ReviseReport {
    Revised {
        accepted: Box<AcceptedPatch>,
        outcome: PublishOutcome,
    },
    /// The change request already carries the maximum number of commits
    LimitReached { commits: u32 },
    /// The change request touches no files
    NothingToRevise,
}

#[derive(Debug)]
pub struct ReviewReport {
    pub review: Review,
    pub comment: String,
    pub posted: bool,
}

/// Wires configuration, the reasoning service and the hosting platform
/// together for one invocation.
pub struct Pipeline {
    config: PatchwrightConfig,
    platform: Arc<dyn HostingPlatform>,
    oracle: Arc<dyn ReasoningClient>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PatchwrightConfig,
        platform: Arc<dyn HostingPlatform>,
        oracle: Arc<dyn ReasoningClient>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            platform,
            oracle,
            clock,
            cancel,
        }
    }

    fn controller(&self) -> FeedbackController {
        FeedbackController::new(
            ControllerSettings::from_config(&self.config.toml),
            self.oracle.clone(),
            Validator::from_config(&self.config.toml.validate),
            self.clock.clone(),
            self.cancel.clone(),
        )
    }

    fn publisher(&self) -> ChangeRequestPublisher {
        ChangeRequestPublisher::new(
            self.platform.clone(),
            &self.config.toml.platform.remote,
            self.config.toml.platform.base_branch.clone(),
            self.config.dry_run,
        )
    }

    /// Generate a patch for issue `number`, commit it to a new branch and
    /// open a change request.
    pub async fn fix_issue(&self, number: u64) -> Result<FixReport, PipelineError> {
        let issue = self.platform.fetch_issue(number).await?;
        let task = Task::generate(self.platform.repository(), number, &issue.title, &issue.body);
        let span = info_span!("task", reference = %task.reference(), kind = %task.kind());

        async {
            let focus = extract_path_hints(&task.description());
            info!(title = %issue.title, focus = ?focus, "fixing issue");

            let workspace = ScopedWorkspace::create(&self.config.project_dir)?;
            let accepted = self.controller().run(&task, &workspace, &focus).await?;
            let outcome = self.publisher().publish_fix(&issue, &accepted, &workspace).await?;
            Ok::<_, PipelineError>(FixReport { accepted, outcome })
        }
        .instrument(span)
        .await
    }

    /// Address review feedback on change request `number` by committing onto
    /// its head branch.
    pub async fn revise(&self, number: u64) -> Result<ReviseReport, PipelineError> {
        let change_request = self.platform.fetch_change_request(number).await?;
        let max_attempts = self.config.toml.loop_.max_attempts;

        let commits = self.platform.count_commits(number).await?;
        if commits >= max_attempts {
            warn!(number, commits, max_attempts, "revision limit reached");
            let notice = format!(
                "patchwright: this change request already has {} commit(s), the limit is {}. \
                 Please review manually.",
                commits, max_attempts
            );
            self.publisher().comment(number, &notice).await?;
            return Ok(ReviseReport::LimitReached { commits });
        }

        let changed = self.platform.changed_files(number).await?;
        if changed.is_empty() {
            info!(number, "change request touches no files");
            return Ok(ReviseReport::NothingToRevise);
        }

        let comments = self.platform.list_comments(number).await?;
        let body = revision_body(&change_request, &comments, self.config.toml.loop_.history_len);
        let task = Task::revise(self.platform.repository(), number, &change_request.title, &body);
        let span = info_span!("task", reference = %task.reference(), kind = %task.kind());

        async {
            info!(branch = %change_request.head_branch, files = changed.len(), "revising change request");
            git::checkout_remote_branch(
                &self.config.project_dir,
                &self.config.toml.platform.remote,
                &change_request.head_branch,
            )
            .await?;

            let workspace = ScopedWorkspace::create(&self.config.project_dir)?;
            let accepted = self.controller().run(&task, &workspace, &changed).await?;
            let outcome = self
                .publisher()
                .publish_revision(&change_request, &accepted, &workspace)
                .await?;
            Ok::<_, PipelineError>(ReviseReport::Revised {
                accepted: Box::new(accepted),
                outcome,
            })
        }
        .instrument(span)
        .await
    }

    /// Review change request `number` and post the result as a comment.
    pub async fn review(&self, number: u64) -> Result<ReviewReport, PipelineError> {
        let change_request = self.platform.fetch_change_request(number).await?;
        let task = Task::review(
            self.platform.repository(),
            number,
            &change_request.title,
            &change_request.body,
        );
        let span = info_span!("task", reference = %task.reference(), kind = %task.kind());

        async {
            let diff = match self.platform.fetch_diff(number).await {
                Ok(diff) => diff,
                Err(e) => {
                    warn!(error = %e, "could not fetch diff");
                    format!("(Could not fetch diff: {})", e)
                }
            };

            let linked_issue = match linked_issue_number(task.body()) {
                Some(issue_number) => match self.platform.fetch_issue(issue_number).await {
                    Ok(issue) => Some(issue),
                    Err(e) => {
                        warn!(issue = issue_number, error = %e, "could not fetch linked issue");
                        None
                    }
                },
                None => None,
            };

            let ci = match self.platform.fetch_check_statuses(&change_request.head_sha).await {
                Ok(checks) => CiSummary::from_checks(checks),
                Err(e) => {
                    warn!(error = %e, "could not fetch CI checks");
                    CiSummary::error(&e.to_string())
                }
            };
            let changed = match self.platform.changed_files(number).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(error = %e, "could not list changed files, skipping local linters");
                    Vec::new()
                }
            };
            let validate = &self.config.toml.validate;
            let lint_results = lint::run_local(
                &validate.lint,
                &self.config.project_dir,
                &changed,
                Duration::from_secs(validate.lint_timeout_secs),
            )
            .await;
            info!(
                ci = %ci.state,
                linked_issue = ?linked_issue.as_ref().map(|i| i.number),
                linters = lint_results.len(),
                "reviewing"
            );

            let synthesizer = ReviewSynthesizer::new(
                self.oracle.clone(),
                self.config.toml.loop_.retry_policy(),
                self.config.toml.context.context_cap_chars,
            );
            let review = synthesizer
                .synthesize(ReviewInput {
                    change_request: &change_request,
                    diff: &diff,
                    linked_issue: linked_issue.as_ref(),
                    ci,
                    lint: lint_results,
                })
                .await;

            let comment = render_comment(&review);
            let posted = self.publisher().comment(number, &comment).await?;
            info!(verdict = %review.verdict, posted, "review complete");
            Ok::<_, PipelineError>(ReviewReport {
                review,
                comment,
                posted,
            })
        }
        .instrument(span)
        .await
    }
}

/// Change request description plus the most recent `history_len` comments.
pub fn revision_body(change_request: &ChangeRequest, comments: &[Comment], history_len: usize) -> String {
    let mut body = change_request.body.trim().to_string();
    let recent = &comments[comments.len().saturating_sub(history_len)..];
    if !recent.is_empty() {
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str("## Review feedback\n");
        for comment in recent {
            body.push_str(&format!(
                "\n--- Comment by {} ---\n{}\n",
                comment.author,
                comment.body.trim()
            ));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::oracle::ScriptedOracle;
    use crate::platform::{CheckRun, CheckStatus, InMemoryPlatform};
    use crate::review::ReviewVerdict;
    use crate::validate::LintCommand;

    fn change_request(number: u64) -> ChangeRequest {
        ChangeRequest {
            number,
            url: "u".into(),
            title: "Fix typo".into(),
            body: "Closes #1".into(),
            head_branch: "patchwright/issue-1".into(),
            head_sha: "abc".into(),
            base_branch: "main".into(),
        }
    }

    fn pipeline(platform: Arc<InMemoryPlatform>, oracle: Arc<ScriptedOracle>, dry_run: bool) -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PatchwrightConfig::new(dir.path().to_path_buf()).unwrap();
        config.dry_run = dry_run;
        config.toml.loop_.plan = false;
        config.toml.loop_.backoff_base_ms = 1;
        let pipeline = Pipeline::new(
            config,
            platform,
            oracle,
            Arc::new(SystemClock),
            CancellationToken::new(),
        );
        (dir, pipeline)
    }

    #[test]
    fn test_revision_body_keeps_recent_comments() {
        let comments: Vec<Comment> = (1..=4)
            .map(|i| Comment {
                author: format!("user{i}"),
                body: format!("comment {i}"),
                created_at: None,
            })
            .collect();
        let body = revision_body(&change_request(5), &comments, 3);
        assert!(body.starts_with("Closes #1\n\n## Review feedback\n"));
        assert!(!body.contains("comment 1"));
        assert!(body.contains("--- Comment by user4 ---\ncomment 4"));
    }

    #[tokio::test]
    async fn test_revise_stops_at_commit_limit() {
        let platform = Arc::new(
            InMemoryPlatform::new("acme/widgets").with_change_request(change_request(5), "", &["main.py"], 3),
        );
        let oracle = Arc::new(ScriptedOracle::new(vec![]));
        let (_dir, pipeline) = pipeline(platform.clone(), oracle.clone(), false);

        let report = pipeline.revise(5).await.unwrap();
        assert!(matches!(report, ReviseReport::LimitReached { commits: 3 }));
        let comments = platform.comments_on(5);
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("Please review manually"));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_revise_without_files_does_nothing() {
        let platform = Arc::new(
            InMemoryPlatform::new("acme/widgets").with_change_request(change_request(5), "", &[], 1),
        );
        let (_dir, pipeline) = pipeline(platform, Arc::new(ScriptedOracle::new(vec![])), false);
        assert!(matches!(pipeline.revise(5).await.unwrap(), ReviseReport::NothingToRevise));
    }

    #[tokio::test]
    async fn test_review_posts_comment_with_linked_issue() {
        let platform = Arc::new(
            InMemoryPlatform::new("acme/widgets")
                .with_issue(1, "Typo", "Wolrd")
                .with_change_request(change_request(5), "-Wolrd\n+World\n", &["main.py"], 1)
                .with_checks(
                    "abc",
                    vec![CheckRun {
                        name: "test".into(),
                        status: CheckStatus::Completed,
                        conclusion: Some("success".into()),
                        url: None,
                    }],
                ),
        );
        let oracle = Arc::new(ScriptedOracle::repeating(
            r#"{"status": "APPROVE", "summary": "Fixes the typo"}"#,
        ));
        let (_dir, pipeline) = pipeline(platform.clone(), oracle.clone(), false);

        let report = pipeline.review(5).await.unwrap();
        assert_eq!(report.review.verdict, ReviewVerdict::Approve);
        assert!(report.posted);
        assert!(oracle.prompts()[0].contains("Title: Typo\nBody: Wolrd"));
        assert_eq!(platform.comments_on(5)[0].body, report.comment);
    }

    #[tokio::test]
    async fn test_review_runs_local_linters_on_changed_files() {
        let platform = Arc::new(
            InMemoryPlatform::new("acme/widgets")
                .with_change_request(change_request(5), "+import os\n", &["main.py", "deleted.py"], 1),
        );
        let oracle = Arc::new(ScriptedOracle::repeating(
            r#"{"status": "REQUEST_CHANGES", "summary": "Unused import"}"#,
        ));
        let (dir, mut pipeline) = pipeline(platform.clone(), oracle.clone(), false);
        std::fs::write(dir.path().join("main.py"), "import os\n").unwrap();
        pipeline.config.toml.validate.lint = vec![LintCommand {
            name: "fake-ruff".into(),
            extensions: vec!["py".into()],
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "echo \"$1:1:1: F401 os imported but unused\"; exit 1".into(),
                "lint".into(),
                "{file}".into(),
            ],
            blocking: false,
        }];

        let report = pipeline.review(5).await.unwrap();
        assert_eq!(report.review.lint.len(), 1);
        assert_eq!(report.review.lint[0].files, 1);
        assert!(oracle.prompts()[0].contains("main.py:1: F401 os imported but unused"));
        assert!(report.comment.contains("<summary>Local Linter Results (1 of 1 with findings)</summary>"));
        assert_eq!(platform.comments_on(5)[0].body, report.comment);
    }

    #[tokio::test]
    async fn test_review_dry_run_with_pending_ci() {
        let platform = Arc::new(
            InMemoryPlatform::new("acme/widgets")
                .with_change_request(change_request(5), "", &["main.py"], 1)
                .with_checks(
                    "abc",
                    vec![CheckRun {
                        name: "test".into(),
                        status: CheckStatus::InProgress,
                        conclusion: None,
                        url: None,
                    }],
                ),
        );
        let (_dir, pipeline) = pipeline(platform.clone(), Arc::new(ScriptedOracle::new(vec![])), true);

        let report = pipeline.review(5).await.unwrap();
        assert_eq!(report.review.verdict, ReviewVerdict::Indeterminate);
        assert!(!report.posted);
        assert!(platform.comments_on(5).is_empty());
    }
}
