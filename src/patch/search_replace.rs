//! `SEARCH`/`REPLACE` block edits.
//!
//! ```text
//! <<<<<< SEARCH
//! original lines
//! ======
//! replacement lines
//! >>>>>> REPLACE
//! ```
//!
//! Every search section must match the current contents exactly once.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ParseError;
use crate::errors::ApplyError;

pub const SEARCH_MARKER: &str = "<<<<<< SEARCH";

static BLOCK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<{6,7} SEARCH\r?\n(.*?)\r?\n={6,7}\r?\n(?:(.*?)\r?\n)?>{6,7} REPLACE").unwrap()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReplaceBlock {
    pub search: String,
    pub replace: String,
}

pub fn has_markers(text: &str) -> bool {
    text.contains(SEARCH_MARKER)
}

/// Parse every block in `text`.
///
/// Text with markers but no complete block is an error rather than a full
/// replacement, so a truncated response never overwrites a file.
pub fn parse_blocks(text: &str) -> Result<Vec<SearchReplaceBlock>, ParseError> {
    let blocks: Vec<SearchReplaceBlock> = BLOCK_REGEX
        .captures_iter(text)
        .map(|caps| SearchReplaceBlock {
            search: caps.get(1).map_or("", |m| m.as_str()).to_string(),
            replace: caps.get(2).map_or("", |m| m.as_str()).to_string(),
        })
        .collect();

    let opened = text.matches(SEARCH_MARKER).count();
    if blocks.is_empty() || blocks.len() < opened {
        return Err(ParseError::MalformedBlocks {
            found: blocks.len(),
            opened,
        });
    }
    Ok(blocks)
}

/// Apply blocks in order; each sees the result of the previous one.
pub fn apply_blocks(
    path: &str,
    original: &str,
    blocks: &[SearchReplaceBlock],
) -> Result<String, ApplyError> {
    let mut content = original.to_string();
    for block in blocks {
        if block.search.is_empty() {
            // Only meaningful for a new or empty file.
            if content.is_empty() {
                content = block.replace.clone();
                continue;
            }
            return Err(ApplyError::AmbiguousSearch {
                path: path.to_string(),
                count: content.chars().count() + 1,
            });
        }

        match content.matches(block.search.as_str()).count() {
            0 => {
                return Err(ApplyError::SearchNotFound {
                    path: path.to_string(),
                    search: block.search.clone(),
                });
            }
            1 => content = content.replacen(block.search.as_str(), &block.replace, 1),
            count => {
                return Err(ApplyError::AmbiguousSearch {
                    path: path.to_string(),
                    count,
                });
            }
        }
    }
    Ok(content)
}
