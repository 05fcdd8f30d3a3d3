//! Unified-diff hunks applied to in-memory file contents.
//!
//! Hunk line numbers are treated as hints: each hunk's context is verified
//! against the file and, if it does not sit exactly where the header says,
//! searched for within a bounded window around that line.

use crate::errors::ApplyError;

/// How far (in lines) a hunk may drift from its header position.
const MAX_OFFSET: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    /// 1-based start line in the original, 0 for insertion into an empty file
    old_start: usize,
    lines: Vec<Line>,
}

impl Hunk {
    fn before(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Context(s) | Line::Remove(s) => Some(s.as_str()),
                Line::Add(_) => None,
            })
            .collect()
    }

    fn after(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Context(s) | Line::Add(s) => Some(s.as_str()),
                Line::Remove(_) => None,
            })
            .collect()
    }
}

/// Whether `text` looks like a unified diff rather than file contents.
pub fn looks_like_diff(text: &str) -> bool {
    let trimmed = text.trim_start();
    (trimmed.starts_with("--- ") || trimmed.starts_with("diff --git") || trimmed.starts_with("@@ "))
        && text.lines().any(|l| l.starts_with("@@ "))
}

/// Number of hunks in a diff, or a description of why it cannot be parsed.
pub fn validate(diff: &str) -> Result<usize, String> {
    parse_hunks(diff).map(|hunks| hunks.len())
}

fn is_file_header(line: &str) -> bool {
    ["--- a/", "+++ b/", "--- /dev/null", "+++ /dev/null", "diff --git"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn parse_range_start(range: &str) -> Option<usize> {
    range.split(',').next()?.parse().ok()
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for (idx, raw) in diff.lines().enumerate() {
        if let Some(header) = raw.strip_prefix("@@ ") {
            let old = header
                .split_whitespace()
                .find_map(|part| part.strip_prefix('-'))
                .ok_or_else(|| format!("line {}: hunk header without old range", idx + 1))?;
            let old_start = parse_range_start(old)
                .ok_or_else(|| format!("line {}: bad hunk range '{}'", idx + 1, old))?;
            hunks.push(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            // File headers and anything else before the first hunk.
            continue;
        };

        if is_file_header(raw) {
            continue;
        }
        match raw.chars().next() {
            Some(' ') => hunk.lines.push(Line::Context(raw[1..].to_string())),
            Some('-') => hunk.lines.push(Line::Remove(raw[1..].to_string())),
            Some('+') => hunk.lines.push(Line::Add(raw[1..].to_string())),
            Some('\\') => {}
            // Blank context lines often lose their leading space in transit.
            None => hunk.lines.push(Line::Context(String::new())),
            Some(_) => return Err(format!("line {}: unexpected content in hunk", idx + 1)),
        }
    }

    if hunks.is_empty() {
        return Err("no @@ hunks found".to_string());
    }
    Ok(hunks)
}

fn find_block(lines: &[&str], block: &[&str], hint: usize, floor: usize) -> Option<usize> {
    if block.is_empty() {
        return Some(hint.clamp(floor, lines.len()));
    }
    let fits = |pos: usize| {
        pos >= floor && pos + block.len() <= lines.len() && lines[pos..pos + block.len()] == *block
    };

    for delta in 0..=MAX_OFFSET {
        if let Some(pos) = hint.checked_sub(delta)
            && fits(pos)
        {
            return Some(pos);
        }
        if delta > 0 && fits(hint + delta) {
            return Some(hint + delta);
        }
    }
    None
}

/// Apply every hunk of `diff` to `original`.
pub fn apply_diff(path: &str, original: &str, diff: &str) -> Result<String, ApplyError> {
    let hunks = parse_hunks(diff).map_err(|reason| ApplyError::HunkMismatch {
        path: path.to_string(),
        hunk: 0,
        reason,
    })?;

    let had_trailing_newline = original.is_empty() || original.ends_with('\n');
    let source: Vec<&str> = original.lines().collect();
    let mut output: Vec<String> = Vec::with_capacity(source.len());
    let mut cursor = 0usize;

    for (i, hunk) in hunks.iter().enumerate() {
        let before = hunk.before();
        let hint = hunk.old_start.saturating_sub(1);

        let pos = find_block(&source, &before, hint, cursor).ok_or_else(|| {
            ApplyError::HunkMismatch {
                path: path.to_string(),
                hunk: i + 1,
                reason: format!(
                    "context not found within {} lines of line {}",
                    MAX_OFFSET, hunk.old_start
                ),
            }
        })?;

        output.extend(source[cursor..pos].iter().map(|s| s.to_string()));
        output.extend(hunk.after().into_iter().map(str::to_string));
        cursor = pos + before.len();
    }
    output.extend(source[cursor..].iter().map(|s| s.to_string()));

    let mut result = output.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}
