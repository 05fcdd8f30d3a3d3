//! Per-file parse checks.

use std::path::Path;

use super::Diagnostic;
use crate::repo_map::{Language, parser};

/// Check one file's contents; `None` means it parses (or is not a checked type).
pub fn check(path: &str, content: &str) -> Option<Diagnostic> {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => check_json(path, content),
        Some("toml") => check_toml(path, content),
        _ => {
            let language = Language::from_path(Path::new(path))?;
            check_source(path, content, language)
        }
    }
}

fn check_source(path: &str, content: &str, language: Language) -> Option<Diagnostic> {
    let Some(tree) = parser::parse(content, language) else {
        return Some(Diagnostic::new(path, None, "parser gave up on this file"));
    };
    parser::first_syntax_error(&tree, content)
        .map(|(line, message)| Diagnostic::new(path, Some(line), &message))
}

fn check_json(path: &str, content: &str) -> Option<Diagnostic> {
    serde_json::from_str::<serde_json::Value>(content)
        .err()
        .map(|e| Diagnostic::new(path, Some(e.line()), &e.to_string()))
}

fn check_toml(path: &str, content: &str) -> Option<Diagnostic> {
    let err = toml::from_str::<toml::Table>(content).err()?;
    let line = err
        .span()
        .map(|span| content[..span.start.min(content.len())].matches('\n').count() + 1);
    Some(Diagnostic::new(path, line, err.message()))
}
