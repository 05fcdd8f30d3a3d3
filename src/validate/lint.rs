//! External lint commands.
//!
//! A linter is any program that prints `path:line[:col]: message` lines. A
//! program that cannot be started or does not finish in time is reported as
//! unavailable rather than as a failure.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Diagnostic;

/// Placeholder replaced by the file path in `args`.
pub const FILE_PLACEHOLDER: &str = "{file}";

static DIAGNOSTIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>[^:\s][^:]*):(?P<line>\d+)(?::\d+)?:\s*(?P<message>.+)$").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintCommand {
    pub name: String,
    /// File extensions (without dot) this linter applies to
    pub extensions: Vec<String>,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Whether violations fail validation
    #[serde(default)]
    pub blocking: bool,
}

impl LintCommand {
    /// `ruff check --select E,F`, non-blocking.
    pub fn ruff() -> Self {
        Self {
            name: "ruff".to_string(),
            extensions: vec!["py".to_string()],
            program: "ruff".to_string(),
            args: ["check", "--select", "E,F", "--output-format", "concise", FILE_PLACEHOLDER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocking: false,
        }
    }

    pub fn applies_to(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }

    /// Argument lists to run: one per file when `{file}` is used, otherwise a
    /// single run with every file appended.
    fn invocations(&self, files: &[&str]) -> Vec<Vec<String>> {
        if self.args.iter().any(|a| a.contains(FILE_PLACEHOLDER)) {
            files
                .iter()
                .map(|file| {
                    self.args
                        .iter()
                        .map(|a| a.replace(FILE_PLACEHOLDER, file))
                        .collect()
                })
                .collect()
        } else {
            let mut args = self.args.clone();
            args.extend(files.iter().map(|f| f.to_string()));
            vec![args]
        }
    }
}

/// Outcome of running one linter over a set of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    Clean,
    Violations(Vec<Diagnostic>),
    Unavailable(String),
}

/// Parse linter output into diagnostics, ignoring summary lines.
pub fn parse_output(output: &str) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| {
            let caps = DIAGNOSTIC_REGEX.captures(line.trim())?;
            let file = caps.name("file")?.as_str().trim();
            let line_no = caps.name("line")?.as_str().parse().ok();
            let message = caps.name("message")?.as_str().trim();
            Some(Diagnostic::new(file, line_no, message))
        })
        .collect()
}

/// Run `lint` over `files` (relative to `root`).
pub async fn run(lint: &LintCommand, root: &Path, files: &[&str], timeout: Duration) -> LintOutcome {
    let mut diagnostics = Vec::new();

    for args in lint.invocations(files) {
        let child = tokio::process::Command::new(&lint.program)
            .args(&args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => return LintOutcome::Unavailable(format!("timed out after {:?}", timeout)),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return LintOutcome::Unavailable(format!("'{}' is not installed", lint.program));
            }
            Ok(Err(e)) => return LintOutcome::Unavailable(format!("failed to start: {}", e)),
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            continue;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_output(&stdout);
        if parsed.is_empty() {
            // Non-zero exit without diagnostics is the tool failing, not the code.
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let detail = if detail.is_empty() { stdout.trim() } else { detail };
            return LintOutcome::Unavailable(format!(
                "exited with {}: {}",
                output.status,
                crate::util::truncate_chars(detail, 200)
            ));
        }
        diagnostics.extend(parsed);
    }

    if diagnostics.is_empty() {
        LintOutcome::Clean
    } else {
        LintOutcome::Violations(diagnostics)
    }
}
