//! Markdown rendering of a review comment.

use std::fmt::Write;

use super::Review;
use super::lint::render_results;

/// Render `review` as a change request comment: verdict header, CI state,
/// collapsible per-check and local linter blocks, and the structured result
/// as JSON.
pub fn render_comment(review: &Review) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Automated Review: {}\n", review.verdict);
    if !review.summary.is_empty() {
        let _ = writeln!(out, "{}\n", review.summary);
    }

    let _ = writeln!(
        out,
        "### CI Pipeline Status: {} {}",
        review.ci.state.emoji(),
        review.ci.state.to_string().to_uppercase()
    );
    let _ = writeln!(out, "{}\n", review.ci.summary);

    if !review.ci.checks.is_empty() {
        out.push_str("<details>\n<summary>CI Check Details</summary>\n\n");
        out.push_str("| Check | Status | Conclusion |\n|-------|--------|------------|\n");
        for check in &review.ci.checks {
            let name = match &check.url {
                Some(url) => format!("[{}]({})", escape_cell(&check.name), url),
                None => escape_cell(&check.name),
            };
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                name,
                check.status.as_str(),
                check.conclusion.as_deref().unwrap_or("N/A")
            );
        }
        out.push_str("\n</details>\n\n");
    }

    if !review.lint.is_empty() {
        let failing = review.lint.iter().filter(|r| !r.is_clean()).count();
        let _ = writeln!(
            out,
            "<details>\n<summary>Local Linter Results ({} of {} with findings)</summary>\n",
            failing,
            review.lint.len()
        );
        let _ = writeln!(out, "```\n{}```\n\n</details>\n", render_results(&review.lint));
    }

    if !review.comments.is_empty() {
        out.push_str("### Comments\n\n");
        for comment in &review.comments {
            match comment.line {
                Some(line) => {
                    let _ = writeln!(out, "- `{}:{}`: {}", comment.file, line, comment.message);
                }
                None => {
                    let _ = writeln!(out, "- `{}`: {}", comment.file, comment.message);
                }
            }
        }
        out.push('\n');
    }

    let json = serde_json::to_string_pretty(review).unwrap_or_else(|_| "{}".to_string());
    let _ = write!(out, "### Structured Feedback\n```json\n{}\n```\n", json);
    out
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{CheckRun, CheckStatus};
    use crate::review::{CiSummary, LineComment, LinterResult, LinterStatus, ReviewVerdict};

    fn review(checks: Vec<CheckRun>) -> Review {
        Review {
            verdict: ReviewVerdict::RequestChanges,
            summary: "Typo remains in README".into(),
            files_to_fix: vec!["README.md".into()],
            comments: vec![LineComment::new("README.md", "still says Wolrd").with_line(2)],
            ci: CiSummary::from_checks(checks),
            lint: Vec::new(),
        }
    }

    #[test]
    fn test_renders_all_sections() {
        let text = render_comment(&review(vec![CheckRun {
            name: "unit | py3.12".into(),
            status: CheckStatus::Completed,
            conclusion: Some("failure".into()),
            url: None,
        }]));
        assert!(text.starts_with("## Automated Review: REQUEST_CHANGES\n"));
        assert!(text.contains("### CI Pipeline Status: ❌ FAILED"));
        assert!(text.contains("| unit \\| py3.12 | completed | failure |"));
        assert!(text.contains("- `README.md:2`: still says Wolrd"));
        assert!(text.contains("\"verdict\": \"REQUEST_CHANGES\""));
        assert!(text.trim_end().ends_with("```"));
    }

    #[test]
    fn test_no_checks_omits_table() {
        let text = render_comment(&review(vec![]));
        assert!(text.contains("⚪ NO_CHECKS"));
        assert!(!text.contains("<details>"));
    }

    #[test]
    fn test_local_linter_block() {
        let mut with_lint = review(vec![]);
        with_lint.lint = vec![
            LinterResult {
                linter: "ruff".into(),
                files: 2,
                status: LinterStatus::Violations {
                    findings: vec!["README.md:2: E501 line too long".into()],
                },
            },
            LinterResult {
                linter: "mypy".into(),
                files: 2,
                status: LinterStatus::Clean,
            },
        ];
        let text = render_comment(&with_lint);
        assert!(text.contains(
            "<details>\n<summary>Local Linter Results (1 of 2 with findings)</summary>\n\n```\nruff: 1 finding(s)\n  README.md:2: E501 line too long\nmypy: clean (2 file(s))\n```\n\n</details>\n"
        ));
        assert!(text.contains("\"linter\": \"ruff\""));
        assert!(text.find("Local Linter Results").unwrap() < text.find("### Comments").unwrap());
    }
}
