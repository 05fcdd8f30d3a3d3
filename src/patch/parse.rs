//! Parse untrusted service output into a [`CandidatePatch`].
//!
//! The expected shape is a JSON object mapping file paths to edits:
//!
//! ```json
//! {
//!   "src/app.py": "full new contents",
//!   "src/lib.py": "<<<<<< SEARCH\nold\n======\nnew\n>>>>>> REPLACE",
//!   "src/util.py": { "diff": "@@ -1 +1 @@\n-a\n+b\n" },
//!   "src/old.py": { "delete": true }
//! }
//! ```
//!
//! Markdown fences and surrounding prose are tolerated, and the object may be
//! wrapped in `files`, `changes`, `code` or `implementation`.

use serde_json::{Map, Value};
use thiserror::Error;

use super::{CandidatePatch, Edit, FileChange, search_replace, unified};
use crate::util::{extract_json_object, strip_code_fences, truncate_chars};

const WRAPPER_KEYS: &[&str] = &["files", "changes", "code", "implementation"];

/// Keys that carry commentary rather than file contents.
const META_KEYS: &[&str] = &[
    "explanation",
    "summary",
    "plan",
    "notes",
    "reasoning",
    "message",
    "description",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no JSON object found in response: {0}")]
    NoJson(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("expected a JSON object mapping paths to edits")]
    NotAnObject,

    #[error("invalid edit for '{path}': {reason}")]
    InvalidValue { path: String, reason: String },

    #[error("empty file path")]
    EmptyPath,

    #[error("{opened} SEARCH marker(s) but only {found} complete SEARCH/REPLACE block(s)")]
    MalformedBlocks { found: usize, opened: usize },
}

/// Parse a raw service response.
///
/// An object with no file entries parses to an empty patch; rejecting it is
/// the caller's decision.
pub fn parse_response(text: &str) -> Result<CandidatePatch, ParseError> {
    let stripped = strip_code_fences(text);
    let json = extract_json_object(stripped)
        .ok_or_else(|| ParseError::NoJson(truncate_chars(stripped, 80).to_string()))?;

    let value: Value =
        serde_json::from_str(json).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(ParseError::NotAnObject);
    };

    // Unwrap {"files": {...}} style envelopes, possibly nested.
    loop {
        let wrapper = WRAPPER_KEYS.iter().find_map(|key| match object.get(*key) {
            Some(Value::Object(_)) | Some(Value::Array(_)) => Some(*key),
            _ => None,
        });
        let Some(key) = wrapper else { break };
        match object.remove(key) {
            Some(Value::Object(inner)) => object = inner,
            Some(Value::Array(items)) => {
                object = array_to_object(key, items)?;
                break;
            }
            _ => break,
        }
    }

    let mut changes = Vec::with_capacity(object.len());
    for (path, value) in object {
        if matches!(value, Value::String(_)) && META_KEYS.contains(&path.as_str()) {
            continue;
        }
        let path = path.trim().to_string();
        if path.is_empty() {
            return Err(ParseError::EmptyPath);
        }
        let edit = parse_edit(&path, value)?;
        changes.push(FileChange { path, edit });
    }

    Ok(CandidatePatch { changes })
}

/// `[{"path": "a.py", "content": "..."}]` → `{"a.py": {"content": "..."}}`
fn array_to_object(key: &str, items: Vec<Value>) -> Result<Map<String, Value>, ParseError> {
    let mut object = Map::new();
    for item in items {
        let Value::Object(mut entry) = item else {
            return Err(ParseError::InvalidValue {
                path: key.to_string(),
                reason: "array entries must be objects".to_string(),
            });
        };
        let path = ["path", "file", "filename"]
            .iter()
            .find_map(|k| match entry.remove(*k) {
                Some(Value::String(p)) => Some(p),
                _ => None,
            })
            .ok_or_else(|| ParseError::InvalidValue {
                path: key.to_string(),
                reason: "array entry has no \"path\"".to_string(),
            })?;
        object.insert(path, Value::Object(entry));
    }
    Ok(object)
}

fn classify_text(path: &str, text: String) -> Result<Edit, ParseError> {
    if search_replace::has_markers(&text) {
        return search_replace::parse_blocks(&text).map(Edit::SearchReplace);
    }
    if unified::looks_like_diff(&text) {
        return diff_edit(path, text);
    }
    Ok(Edit::FullContent(text))
}

fn diff_edit(path: &str, diff: String) -> Result<Edit, ParseError> {
    unified::validate(&diff).map_err(|reason| ParseError::InvalidValue {
        path: path.to_string(),
        reason,
    })?;
    Ok(Edit::UnifiedDiff(diff))
}

fn parse_edit(path: &str, value: Value) -> Result<Edit, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidValue {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    match value {
        Value::String(text) => classify_text(path, text),
        Value::Object(mut fields) => {
            if let Some(delete) = fields.get("delete") {
                return if delete.as_bool() == Some(true) {
                    Ok(Edit::Delete)
                } else {
                    Err(invalid("\"delete\" must be true"))
                };
            }
            if let Some(content) = fields.remove("content") {
                return match content {
                    Value::String(text) if search_replace::has_markers(&text) => {
                        search_replace::parse_blocks(&text).map(Edit::SearchReplace)
                    }
                    Value::String(text) => Ok(Edit::FullContent(text)),
                    _ => Err(invalid("\"content\" must be a string")),
                };
            }
            if let Some(diff) = fields.remove("diff") {
                return match diff {
                    Value::String(text) if search_replace::has_markers(&text) => {
                        search_replace::parse_blocks(&text).map(Edit::SearchReplace)
                    }
                    Value::String(text) => diff_edit(path, text),
                    _ => Err(invalid("\"diff\" must be a string")),
                };
            }
            Err(invalid(
                "expected a string or an object with \"content\", \"diff\" or \"delete\"",
            ))
        }
        Value::Null => Err(invalid("null edit; use {\"delete\": true} to remove a file")),
        _ => Err(invalid("expected a string or an object")),
    }
}
