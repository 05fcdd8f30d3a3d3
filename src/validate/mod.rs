//! Candidate validation: parse checks plus configured external linters.
//!
//! Syntax errors always fail a candidate. Lint violations fail it only when the
//! linter is marked `blocking`. A linter that cannot run never fails a
//! candidate; it downgrades the verdict to [`Verdict::PassWithWarnings`].

pub mod lint;
pub mod syntax;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ValidateConfig;
use crate::errors::PipelineError;
pub use lint::{LintCommand, LintOutcome};

/// One problem found in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(file: &str, line: Option<usize>, message: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.file, line, self.message),
            None => write!(f, "{}: {}", self.file, self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintViolation {
    pub linter: String,
    pub blocking: bool,
    pub diagnostic: Diagnostic,
}

/// A check that could not be run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolIssue {
    pub tool: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl Verdict {
    pub fn accepted(self) -> bool {
        !matches!(self, Verdict::Fail)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::PassWithWarnings => "pass with warnings",
            Verdict::Fail => "fail",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub syntax_errors: Vec<Diagnostic>,
    pub violations: Vec<LintViolation>,
    pub unavailable: Vec<ToolIssue>,
    pub verdict: Verdict,
}

impl ValidationReport {
    fn from_findings(
        syntax_errors: Vec<Diagnostic>,
        violations: Vec<LintViolation>,
        unavailable: Vec<ToolIssue>,
    ) -> Self {
        let verdict = if !syntax_errors.is_empty() || violations.iter().any(|v| v.blocking) {
            Verdict::Fail
        } else if !violations.is_empty() || !unavailable.is_empty() {
            Verdict::PassWithWarnings
        } else {
            Verdict::Pass
        };
        Self {
            syntax_errors,
            violations,
            unavailable,
            verdict,
        }
    }

    pub fn accepted(&self) -> bool {
        self.verdict.accepted()
    }

    /// Diagnostics that explain a failure, one per line, for feeding back to
    /// the reasoning service.
    pub fn diagnostics_text(&self) -> String {
        let mut lines: Vec<String> = self
            .syntax_errors
            .iter()
            .map(|d| format!("syntax error: {}", d))
            .collect();
        lines.extend(
            self.violations
                .iter()
                .filter(|v| v.blocking)
                .map(|v| format!("{}: {}", v.linter, v.diagnostic)),
        );
        lines.join("\n")
    }

    /// Non-fatal findings, for logs and change request bodies.
    pub fn warnings(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .violations
            .iter()
            .filter(|v| !v.blocking)
            .map(|v| format!("{}: {}", v.linter, v.diagnostic))
            .collect();
        out.extend(
            self.unavailable
                .iter()
                .map(|t| {
                    PipelineError::ToolUnavailable {
                        tool: t.tool.clone(),
                        reason: t.reason.clone(),
                    }
                    .to_string()
                }),
        );
        out
    }
}

/// Runs syntax checks and linters over changed files.
#[derive(Debug, Clone)]
pub struct Validator {
    lints: Vec<LintCommand>,
    timeout: Duration,
}

impl Validator {
    pub fn new(lints: Vec<LintCommand>, timeout: Duration) -> Self {
        Self { lints, timeout }
    }

    pub fn from_config(config: &ValidateConfig) -> Self {
        Self::new(
            config.lint.clone(),
            Duration::from_secs(config.lint_timeout_secs),
        )
    }

    /// Syntax checks only.
    pub fn syntax_only() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    /// Validate `changed` (paths relative to `root`). Deleted files are
    /// skipped.
    pub async fn validate(&self, root: &Path, changed: &[String]) -> ValidationReport {
        let mut syntax_errors = Vec::new();
        let mut present: Vec<&str> = Vec::new();

        for path in changed {
            let content = match std::fs::read(root.join(path)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    syntax_errors.push(Diagnostic::new(path, None, &format!("unreadable: {}", e)));
                    continue;
                }
            };
            present.push(path);
            let Ok(text) = String::from_utf8(content) else {
                continue;
            };
            if let Some(diag) = syntax::check(path, &text) {
                debug!(file = %path, error = %diag, "syntax check failed");
                syntax_errors.push(diag);
            }
        }

        let mut violations = Vec::new();
        let mut unavailable = Vec::new();

        for lint in &self.lints {
            let files: Vec<&str> = present
                .iter()
                .copied()
                .filter(|p| lint.applies_to(p))
                .collect();
            if files.is_empty() {
                continue;
            }

            match lint::run(lint, root, &files, self.timeout).await {
                LintOutcome::Clean => debug!(linter = %lint.name, files = files.len(), "lint clean"),
                LintOutcome::Violations(diags) => {
                    info!(
                        linter = %lint.name,
                        count = diags.len(),
                        blocking = lint.blocking,
                        "lint violations"
                    );
                    violations.extend(diags.into_iter().map(|diagnostic| LintViolation {
                        linter: lint.name.clone(),
                        blocking: lint.blocking,
                        diagnostic,
                    }));
                }
                LintOutcome::Unavailable(reason) => {
                    warn!(linter = %lint.name, reason = %reason, "tool unavailable, skipping");
                    unavailable.push(ToolIssue {
                        tool: lint.name.clone(),
                        reason,
                    });
                }
            }
        }

        ValidationReport::from_findings(syntax_errors, violations, unavailable)
    }
}
