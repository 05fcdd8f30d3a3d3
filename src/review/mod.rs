//! Change request review.
//!
//! [`ReviewSynthesizer`] combines the diff, the linked issue, the CI state
//! and local linter results into a structured [`Review`]. CI that is still
//! running short-circuits to [`ReviewVerdict::Indeterminate`] without
//! consulting the reasoning service.

pub mod ci;
pub mod lint;
pub mod render;

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::oracle::{OracleRequest, ReasoningClient, RetryPolicy, call_with_retry};
use crate::platform::{ChangeRequest, Issue};
use crate::util::{extract_json_object, strip_code_fences, truncate_chars};

pub use ci::{CiState, CiSummary};
pub use lint::{LinterResult, LinterStatus};
pub use render::render_comment;

static ISSUE_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#(\d+)").unwrap());

const REVIEW_SYSTEM: &str = "You are a meticulous code reviewer. Judge whether the diff resolves \
the issue correctly and safely. Output only one valid JSON object.";

/// Overall outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewVerdict {
    Approve,
    RequestChanges,
    CommentOnly,
    /// CI has not finished; no judgement yet
    Indeterminate,
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewVerdict::Approve => "APPROVE",
            ReviewVerdict::RequestChanges => "REQUEST_CHANGES",
            ReviewVerdict::CommentOnly => "COMMENT",
            ReviewVerdict::Indeterminate => "INDETERMINATE",
        };
        f.write_str(s)
    }
}

/// A remark on one location in the diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineComment {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

impl LineComment {
    pub fn new(file: &str, message: &str) -> Self {
        Self {
            file: file.to_string(),
            line: None,
            message: message.to_string(),
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Review {
    pub verdict: ReviewVerdict,
    pub summary: String,
    pub files_to_fix: Vec<String>,
    pub comments: Vec<LineComment>,
    pub ci: CiSummary,
    pub lint: Vec<LinterResult>,
}

/// What the service is asked to return.
#[derive(Debug, Deserialize)]
struct ReviewWire {
    status: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    files_to_fix: Vec<String>,
    #[serde(default)]
    comments: Vec<LineComment>,
}

/// First `#N` reference in a change request body.
pub fn linked_issue_number(body: &str) -> Option<u64> {
    ISSUE_REF_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn parse_verdict(status: &str) -> Option<ReviewVerdict> {
    match status.trim().to_ascii_uppercase().replace([' ', '-'], "_").as_str() {
        "APPROVE" | "APPROVED" => Some(ReviewVerdict::Approve),
        "REQUEST_CHANGES" | "CHANGES_REQUESTED" => Some(ReviewVerdict::RequestChanges),
        "COMMENT" | "COMMENT_ONLY" => Some(ReviewVerdict::CommentOnly),
        _ => None,
    }
}

/// Everything a review looks at.
pub struct ReviewInput<'a> {
    pub change_request: &'a ChangeRequest,
    pub diff: &'a str,
    pub linked_issue: Option<&'a Issue>,
    pub ci: CiSummary,
    /// Linters run over the changed files in the local checkout
    pub lint: Vec<LinterResult>,
}

pub struct ReviewSynthesizer {
    oracle: Arc<dyn ReasoningClient>,
    retry: RetryPolicy,
    /// Diff characters sent to the service
    diff_cap: usize,
}

impl ReviewSynthesizer {
    pub fn new(oracle: Arc<dyn ReasoningClient>, retry: RetryPolicy, diff_cap: usize) -> Self {
        Self {
            oracle,
            retry,
            diff_cap,
        }
    }

    pub fn request(&self, input: &ReviewInput<'_>) -> OracleRequest {
        let issue = match input.linked_issue {
            Some(issue) => format!("Title: {}\nBody: {}", issue.title, issue.body),
            None => "No linked issue found.".to_string(),
        };
        let diff = truncate_chars(input.diff, self.diff_cap);
        let truncated = if diff.len() < input.diff.len() {
            "\n... (diff truncated)"
        } else {
            ""
        };

        let prompt = format!(
            "## Change request #{number}: {title}\n\n{body}\n\n\
             ## Linked issue\n\n{issue}\n\n\
             ## CI pipeline status\n\n{ci}\n\n\
             ## Local linter results\n\n{lint}\n\
             ## Diff\n\n```diff\n{diff}{truncated}\n```\n\n\
             Return ONLY a JSON object with:\n\
             - \"status\": \"APPROVE\" or \"REQUEST_CHANGES\"\n\
             - \"summary\": string\n\
             - \"files_to_fix\": list of file paths\n\
             - \"comments\": list of {{\"file\": string, \"line\": integer, \"message\": string}}\n",
            number = input.change_request.number,
            title = input.change_request.title,
            body = input.change_request.body,
            ci = input.ci.summary,
            lint = lint::render_results(&input.lint),
        );
        OracleRequest::new(REVIEW_SYSTEM, prompt)
    }

    /// Produce a review.
    ///
    /// Pending CI gives `Indeterminate`. Failed CI never yields `Approve`. A
    /// response that cannot be understood yields `CommentOnly` rather than
    /// an approval.
    pub async fn synthesize(&self, input: ReviewInput<'_>) -> Review {
        if input.ci.state == CiState::Pending {
            info!(pending = ?input.ci.pending, "CI still running, review is indeterminate");
            return Review {
                verdict: ReviewVerdict::Indeterminate,
                summary: format!(
                    "CI has not finished ({}). Review again once all checks complete.",
                    input.ci.pending.join(", ")
                ),
                files_to_fix: Vec::new(),
                comments: Vec::new(),
                ci: input.ci,
                lint: input.lint,
            };
        }

        let request = self.request(&input);
        let response = match call_with_retry(self.oracle.as_ref(), &request, &self.retry).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "review request failed");
                return Review {
                    verdict: ReviewVerdict::CommentOnly,
                    summary: format!("Automated review unavailable: {}", e),
                    files_to_fix: Vec::new(),
                    comments: Vec::new(),
                    ci: input.ci,
                    lint: input.lint,
                };
            }
        };

        let parsed = extract_json_object(strip_code_fences(&response))
            .and_then(|json| serde_json::from_str::<ReviewWire>(json).ok());
        let Some(wire) = parsed else {
            warn!(chars = response.len(), "review response was not valid JSON");
            return Review {
                verdict: ReviewVerdict::CommentOnly,
                summary: "Could not parse the automated review.".to_string(),
                files_to_fix: Vec::new(),
                comments: Vec::new(),
                ci: input.ci,
                lint: input.lint,
            };
        };

        let mut verdict = parse_verdict(&wire.status).unwrap_or(ReviewVerdict::CommentOnly);
        if verdict == ReviewVerdict::Approve && input.ci.state == CiState::Failed {
            info!("downgrading approval: CI failed");
            verdict = ReviewVerdict::RequestChanges;
        }

        Review {
            verdict,
            summary: wire.summary,
            files_to_fix: wire.files_to_fix,
            comments: wire.comments,
            ci: input.ci,
            lint: input.lint,
        }
    }
}
