//! Candidate patches proposed by the reasoning service.
//!
//! A patch is an ordered list of per-file edits. Edits come in four shapes:
//! full replacement content, search/replace blocks, unified-diff hunks, and
//! deletion. Parsing lives in [`parse`]; applying the incremental formats to
//! file contents lives in [`search_replace`] and [`unified`]. Writing to disk
//! is the workspace's job.

pub mod parse;
pub mod search_replace;
pub mod unified;

use serde::{Deserialize, Serialize};

use crate::errors::ApplyError;

pub use parse::{ParseError, parse_response};
pub use search_replace::SearchReplaceBlock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Edit {
    FullContent(String),
    SearchReplace(Vec<SearchReplaceBlock>),
    UnifiedDiff(String),
    Delete,
}

impl Edit {
    /// New contents of a file given its current contents.
    ///
    /// Returns `None` for deletion.
    pub fn apply_to(&self, path: &str, original: &str) -> Result<Option<String>, ApplyError> {
        match self {
            Edit::FullContent(content) => Ok(Some(content.clone())),
            Edit::SearchReplace(blocks) => {
                search_replace::apply_blocks(path, original, blocks).map(Some)
            }
            Edit::UnifiedDiff(diff) => unified::apply_diff(path, original, diff).map(Some),
            Edit::Delete => Ok(None),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Edit::FullContent(_) => "full content",
            Edit::SearchReplace(_) => "search/replace",
            Edit::UnifiedDiff(_) => "unified diff",
            Edit::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path relative to the repository root, as the service wrote it
    pub path: String,
    pub edit: Edit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePatch {
    pub changes: Vec<FileChange>,
}

impl CandidatePatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.path.as_str())
    }

    /// One line per change, for logs and attempt summaries.
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(|c| format!("{} ({})", c.path, c.edit.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
