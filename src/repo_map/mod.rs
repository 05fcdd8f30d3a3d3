//! Structural map of a repository for prompt context.
//!
//! Source files are reduced to their top-level signatures; small non-source
//! files are included verbatim; everything else is listed by path with the
//! reason it was left out. Output order is fully deterministic: focus files
//! first, then everything else, each group sorted by path.

pub mod parser;

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::PipelineError;

/// Directories never walked, at any depth.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".patchwright",
    "target",
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    ".env",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "dist",
    "build",
];

/// File names that carry credentials. Never mapped, copied or written.
pub const SECRET_FILE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "id_rsa*",
    "id_dsa*",
    "id_ecdsa*",
    "id_ed25519*",
    ".netrc",
    ".pypirc",
];

static SECRET_FILES: LazyLock<Vec<glob::Pattern>> = LazyLock::new(|| {
    SECRET_FILE_PATTERNS
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect()
});

/// Whether a file name (last path component) looks like it holds secrets.
pub fn is_secret_file(name: &str) -> bool {
    SECRET_FILES.iter().any(|p| p.matches(name))
}

/// Source files larger than this are not parsed.
const MAX_PARSE_BYTES: u64 = 512 * 1024;

/// Non-focus files longer than this are not shown in full.
pub const CONTENT_MAX_CHARS: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "js" | "mjs" | "cjs" | "jsx" => Some(Self::JavaScript),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Trait,
    Interface,
    Impl,
    Type,
    Const,
    Module,
    Macro,
    Import,
}

/// A declaration signature without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub signature: String,
    /// 1-based line of the declaration
    pub line: usize,
    /// Methods of a class, impl block or trait
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Symbol>,
}

impl Symbol {
    pub(crate) fn new(kind: SymbolKind, signature: String, node: &tree_sitter::Node) -> Self {
        Self {
            kind,
            signature,
            line: node.start_position().row + 1,
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileSummary {
    Symbols { symbols: Vec<Symbol> },
    Excerpt { text: String },
    Omitted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    pub summary: FileSummary,
}

impl FileEntry {
    fn render_block(&self) -> String {
        let mut block = String::new();
        match &self.summary {
            FileSummary::Symbols { symbols } => {
                let _ = writeln!(block, "{}", self.path);
                for symbol in symbols {
                    let _ = writeln!(block, "    {}", symbol.signature);
                    for member in &symbol.members {
                        let _ = writeln!(block, "        {}", member.signature);
                    }
                }
            }
            FileSummary::Excerpt { text } => {
                let _ = writeln!(block, "{}", self.path);
                for line in text.lines() {
                    let _ = writeln!(block, "    | {}", line);
                }
            }
            FileSummary::Omitted { reason } => {
                let _ = writeln!(block, "{}  ({})", self.path, reason);
            }
        }
        block
    }
}

/// Full text of one file as it currently stands in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub text: String,
}

/// Render file contents as fenced blocks headed by their paths.
pub fn render_contents(files: &[FileContent]) -> String {
    let mut out = String::new();
    for file in files {
        let _ = writeln!(out, "### {}\n```\n{}\n```\n", file.path, file.text.trim_end_matches('\n'));
    }
    out
}

/// Ordered per-file summaries of one repository snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryContext {
    pub entries: Vec<FileEntry>,
}

impl RepositoryContext {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.path.as_str())
    }

    /// Render for a prompt within `cap` characters.
    ///
    /// Entries are rendered in full until one would overflow the cap; from
    /// then on only paths are listed, and a single marker line reports how
    /// many entries lost their detail.
    pub fn render(&self, cap: usize) -> String {
        let mut out = String::new();
        let mut used = 0usize;
        let mut detailed = true;
        let mut truncated = 0usize;

        for entry in &self.entries {
            if detailed {
                let block = entry.render_block();
                let len = block.chars().count();
                if used + len <= cap {
                    out.push_str(&block);
                    used += len;
                    continue;
                }
                detailed = false;
            }

            truncated += 1;
            let line = format!("{}\n", entry.path);
            let len = line.chars().count();
            if used + len <= cap {
                out.push_str(&line);
                used += len;
            }
        }

        if truncated > 0 {
            let _ = writeln!(
                out,
                "... (truncated: {} file(s) shown without detail or omitted)",
                truncated
            );
        }
        out
    }

    /// Read the current text of files worth showing in full.
    ///
    /// Focus files come first at any size, then other parsed source files of
    /// at most [`CONTENT_MAX_CHARS`]. Files are taken in map order and any
    /// that would push the total past `cap` characters are skipped.
    pub fn current_contents(&self, root: &Path, focus: &[String], cap: usize) -> Vec<FileContent> {
        let mut files = Vec::new();
        let mut used = 0usize;

        for entry in &self.entries {
            let focused = focus.iter().any(|f| matches_focus(&entry.path, f));
            if !focused && !matches!(entry.summary, FileSummary::Symbols { .. }) {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(root.join(&entry.path)) else {
                continue;
            };
            let len = text.chars().count();
            if (!focused && len > CONTENT_MAX_CHARS) || used + len > cap {
                continue;
            }
            used += len;
            files.push(FileContent {
                path: entry.path.clone(),
                text,
            });
        }
        files
    }
}

/// Options for [`RepositoryMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapOptions {
    pub excerpt_max_bytes: u64,
    /// Glob patterns matched against `/`-separated relative paths
    pub exclude: Vec<String>,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            excerpt_max_bytes: 2_000,
            exclude: Vec::new(),
        }
    }
}

pub struct RepositoryMap {
    options: MapOptions,
    exclude: Vec<glob::Pattern>,
}

impl RepositoryMap {
    /// Invalid exclude patterns are dropped (config validation reports them).
    pub fn new(options: MapOptions) -> Self {
        let exclude = options
            .exclude
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        Self { options, exclude }
    }

    /// Walk `root` and summarize every file.
    ///
    /// `focus` entries are matched against relative paths either exactly or
    /// as a path suffix (`models.py` matches `app/models.py`).
    pub fn build(&self, root: &Path, focus: &[String]) -> Result<RepositoryContext, PipelineError> {
        if !root.is_dir() {
            return Err(PipelineError::Filesystem {
                path: root.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file()
                || entry.file_name().to_str().is_none_or(is_secret_file)
            {
                continue;
            }
            let Some(rel) = relative_path(root, entry.path()) else {
                continue;
            };
            if self.exclude.iter().any(|p| p.matches(&rel)) {
                continue;
            }
            let summary = self.summarize(entry.path());
            entries.push(FileEntry { path: rel, summary });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let (mut ordered, rest): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|e| focus.iter().any(|f| matches_focus(&e.path, f)));
        ordered.extend(rest);

        tracing::debug!(files = ordered.len(), root = %root.display(), "repository map built");
        Ok(RepositoryContext { entries: ordered })
    }

    fn summarize(&self, path: &Path) -> FileSummary {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                return FileSummary::Omitted {
                    reason: format!("unreadable: {}", e.kind()),
                };
            }
        };

        let language = Language::from_path(path);
        if language.is_some() && size > MAX_PARSE_BYTES {
            return FileSummary::Omitted {
                reason: format!("{} bytes, too large to parse", size),
            };
        }
        if language.is_none() && size > self.options.excerpt_max_bytes {
            return FileSummary::Omitted {
                reason: format!("{} bytes", size),
            };
        }

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return FileSummary::Omitted {
                    reason: format!("unreadable: {}", e.kind()),
                };
            }
        };
        let content = match String::from_utf8(bytes) {
            Ok(content) if !content.contains('\0') => content,
            _ => {
                return FileSummary::Omitted {
                    reason: "binary".to_string(),
                };
            }
        };

        if let Some(language) = language {
            match parser::parse(&content, language) {
                Some(tree) if !tree.root_node().has_error() => {
                    return FileSummary::Symbols {
                        symbols: parser::outline(&tree, &content, language),
                    };
                }
                _ => {
                    tracing::debug!(path = %path.display(), "parse failed, degrading to excerpt");
                }
            }
        }

        if size <= self.options.excerpt_max_bytes {
            FileSummary::Excerpt { text: content }
        } else {
            FileSummary::Omitted {
                reason: format!("{} bytes, does not parse", size),
            }
        }
    }
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

fn matches_focus(path: &str, hint: &str) -> bool {
    let hint = hint.trim_start_matches("./");
    path == hint || path.ends_with(&format!("/{}", hint))
}

// Optional directories, then a file name with a letter-led extension.
static PATH_HINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[A-Za-z0-9_.\-]+/)*[A-Za-z0-9_\-]+\.[A-Za-z][A-Za-z0-9]{0,9}\b").unwrap()
});

/// File-path-looking tokens mentioned in free text, sorted and deduplicated.
pub fn extract_path_hints(text: &str) -> Vec<String> {
    let hints: BTreeSet<String> = PATH_HINT_REGEX
        .find_iter(text)
        .map(|m| m.as_str().trim_start_matches("./").to_string())
        .filter(|h| !h.starts_with("www.") && !h.contains("://"))
        .collect();
    hints.into_iter().collect()
}
