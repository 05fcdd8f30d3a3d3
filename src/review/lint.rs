//! Local linter pass over the files a change request touches.
//!
//! Reuses the configured [`LintCommand`]s. Files missing from the local
//! checkout are skipped, and a linter that cannot run is reported, not fatal.

use std::fmt::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::validate::lint::{self, LintCommand, LintOutcome};

/// Findings kept per linter in prompts and comments.
const MAX_FINDINGS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinterStatus {
    Clean,
    Violations { findings: Vec<String> },
    Unavailable { reason: String },
}

/// Outcome of one linter over the change request's files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinterResult {
    pub linter: String,
    pub files: usize,
    #[serde(flatten)]
    pub status: LinterStatus,
}

impl LinterResult {
    pub fn is_clean(&self) -> bool {
        self.status == LinterStatus::Clean
    }
}

/// Run every linter that applies to at least one of `files` present under
/// `root`. Linters with nothing to check are left out.
pub async fn run_local(
    lints: &[LintCommand],
    root: &Path,
    files: &[String],
    timeout: Duration,
) -> Vec<LinterResult> {
    let present: Vec<&str> = files
        .iter()
        .map(String::as_str)
        .filter(|f| root.join(f).is_file())
        .collect();

    let mut results = Vec::new();
    for command in lints {
        let targets: Vec<&str> = present
            .iter()
            .copied()
            .filter(|f| command.applies_to(f))
            .collect();
        if targets.is_empty() {
            continue;
        }

        let status = match lint::run(command, root, &targets, timeout).await {
            LintOutcome::Clean => LinterStatus::Clean,
            LintOutcome::Violations(diagnostics) => LinterStatus::Violations {
                findings: diagnostics.iter().map(ToString::to_string).collect(),
            },
            LintOutcome::Unavailable(reason) => {
                warn!(linter = %command.name, reason = %reason, "review linter unavailable");
                LinterStatus::Unavailable { reason }
            }
        };
        debug!(linter = %command.name, files = targets.len(), ?status, "review lint finished");
        results.push(LinterResult {
            linter: command.name.clone(),
            files: targets.len(),
            status,
        });
    }
    results
}

/// Plain-text summary used in both the prompt and the comment.
pub fn render_results(results: &[LinterResult]) -> String {
    if results.is_empty() {
        return "No local linters applied to the changed files.\n".to_string();
    }

    let mut out = String::new();
    for result in results {
        match &result.status {
            LinterStatus::Clean => {
                let _ = writeln!(out, "{}: clean ({} file(s))", result.linter, result.files);
            }
            LinterStatus::Violations { findings } => {
                let _ = writeln!(out, "{}: {} finding(s)", result.linter, findings.len());
                for finding in findings.iter().take(MAX_FINDINGS) {
                    let _ = writeln!(out, "  {}", finding);
                }
                if findings.len() > MAX_FINDINGS {
                    let _ = writeln!(out, "  ... {} more", findings.len() - MAX_FINDINGS);
                }
            }
            LinterStatus::Unavailable { reason } => {
                let _ = writeln!(out, "{}: not run ({})", result.linter, reason);
            }
        }
    }
    out
}
