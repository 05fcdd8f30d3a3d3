//! Per-task scoped working copy.
//!
//! Candidate patches are materialized in a private copy of the repository so a
//! rejected attempt never touches the real tree. `apply` is all-or-nothing and
//! hands back an [`AppliedPatch`] that records prior bytes, which `rollback`
//! uses to restore the copy exactly.

pub mod git;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use crate::errors::{ApplyError, PipelineError};
use crate::patch::{CandidatePatch, Edit};
use crate::repo_map::{SKIP_DIRS, is_secret_file};

pub use git::CommitTarget;

/// One file written or removed by an applied patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedFile {
    /// Validated `/`-separated relative path
    pub path: String,
    /// Bytes before the patch; `None` if the patch created the file
    prior: Option<Vec<u8>>,
    /// Contents after the patch; `None` if the patch deleted the file
    pub contents: Option<String>,
}

impl TouchedFile {
    pub fn created(&self) -> bool {
        self.prior.is_none()
    }

    pub fn deleted(&self) -> bool {
        self.contents.is_none()
    }
}

/// Record of a patch written into a scoped copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedPatch {
    pub files: Vec<TouchedFile>,
    /// Directories created to hold new files, outermost first
    created_dirs: Vec<PathBuf>,
}

impl AppliedPatch {
    /// Files that exist after the patch (the ones worth validating).
    pub fn changed_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| !f.deleted())
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.deleted())
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Private copy of a repository living in a temp directory.
///
/// The directory is removed when the workspace is dropped.
pub struct ScopedWorkspace {
    dir: TempDir,
    source_root: PathBuf,
}

impl ScopedWorkspace {
    /// Copy `source_root` (minus `.git`, other skipped directories and
    /// credential files).
    pub fn create(source_root: &Path) -> Result<Self, PipelineError> {
        let fs_err = |path: &Path, source: std::io::Error| PipelineError::Filesystem {
            path: path.to_path_buf(),
            source,
        };

        let dir = tempfile::Builder::new()
            .prefix("patchwright-")
            .tempdir()
            .map_err(|e| fs_err(&std::env::temp_dir(), e))?;

        let walker = WalkDir::new(source_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir()
                        && e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
            });

        let mut copied = 0usize;
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(source_root).to_path_buf();
                fs_err(&path, e.into())
            })?;
            let Ok(rel) = entry.path().strip_prefix(source_root) else {
                continue;
            };
            let target = dir.path().join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| fs_err(&target, e))?;
            } else if entry.file_type().is_file()
                && !entry.file_name().to_str().is_some_and(is_secret_file)
            {
                std::fs::copy(entry.path(), &target).map_err(|e| fs_err(entry.path(), e))?;
                copied += 1;
            }
        }

        tracing::debug!(
            files = copied,
            from = %source_root.display(),
            to = %dir.path().display(),
            "scoped workspace created"
        );
        Ok(Self {
            dir,
            source_root: source_root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Materialize `patch`.
    ///
    /// Every edit is resolved against current contents before anything is
    /// written; if a write then fails, files already written are restored.
    pub fn apply(&self, patch: &CandidatePatch) -> Result<AppliedPatch, ApplyError> {
        // path -> (contents before this patch, staged contents)
        let mut staged: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();

        for change in &patch.changes {
            let rel = safe_relative(&change.path)?;
            if rel.rsplit('/').next().is_some_and(is_secret_file) {
                return Err(ApplyError::ProtectedPath { path: rel });
            }
            let current = match staged.get(&rel) {
                Some((_, staged_contents)) => staged_contents.clone(),
                None => {
                    let original = self.read_text(&rel)?;
                    staged.insert(rel.clone(), (original.clone(), original.clone()));
                    order.push(rel.clone());
                    original
                }
            };

            let next = match (&change.edit, &current) {
                (Edit::Delete, None) => {
                    return Err(ApplyError::MissingFile { path: rel });
                }
                (edit, Some(text)) => edit.apply_to(&rel, text)?,
                (edit, None) => edit.apply_to(&rel, "").map_err(|e| match e {
                    ApplyError::SearchNotFound { .. } | ApplyError::HunkMismatch { .. } => {
                        ApplyError::MissingFile { path: rel.clone() }
                    }
                    other => other,
                })?,
            };
            if let Some(entry) = staged.get_mut(&rel) {
                entry.1 = next;
            }
        }

        let mut applied = AppliedPatch::default();
        for rel in order {
            let Some((original, contents)) = staged.remove(&rel) else {
                continue;
            };
            if original == contents {
                continue;
            }
            if let Err(e) = self.write_one(&rel, contents, &mut applied) {
                if let Err(restore) = self.rollback(applied) {
                    tracing::error!(error = %restore, "failed to restore scoped workspace after partial write");
                }
                return Err(e);
            }
        }

        Ok(applied)
    }

    /// Current text of `rel`, `None` if absent.
    ///
    /// Directories, paths under a regular file and non-UTF-8 files are
    /// conflicts rather than I/O failures.
    fn read_text(&self, rel: &str) -> Result<Option<String>, ApplyError> {
        use std::io::ErrorKind;

        let not_text = |reason: &str| ApplyError::NotATextFile {
            path: rel.to_string(),
            reason: reason.to_string(),
        };
        let path = self.root().join(rel);
        if path.is_dir() {
            return Err(not_text("is a directory"));
        }
        match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| not_text("not valid UTF-8")),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == ErrorKind::IsADirectory => Err(not_text("is a directory")),
            Err(e) if e.kind() == ErrorKind::NotADirectory => {
                Err(not_text("a parent path is a regular file"))
            }
            Err(source) => Err(ApplyError::Io { path, source }),
        }
    }

    fn write_one(
        &self,
        rel: &str,
        contents: Option<String>,
        applied: &mut AppliedPatch,
    ) -> Result<(), ApplyError> {
        let path = self.root().join(rel);
        let io_err = |path: &Path, source| ApplyError::Io {
            path: path.to_path_buf(),
            source,
        };

        let prior = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(&path, e)),
        };

        match &contents {
            Some(text) => {
                if let Some(parent) = path.parent() {
                    let mut missing = Vec::new();
                    let mut dir = parent;
                    while !dir.exists() && dir.starts_with(self.root()) {
                        missing.push(dir.to_path_buf());
                        match dir.parent() {
                            Some(p) => dir = p,
                            None => break,
                        }
                    }
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                    applied.created_dirs.extend(missing.into_iter().rev());
                }
                std::fs::write(&path, text).map_err(|e| io_err(&path, e))?;
            }
            None => std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?,
        }

        applied.files.push(TouchedFile {
            path: rel.to_string(),
            prior,
            contents,
        });
        Ok(())
    }

    /// Undo `applied`, leaving the copy byte-identical to its prior state.
    pub fn rollback(&self, applied: AppliedPatch) -> Result<(), ApplyError> {
        for file in applied.files.into_iter().rev() {
            let path = self.root().join(&file.path);
            let result = match file.prior {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    std::fs::write(&path, bytes)
                }
                None => match std::fs::remove_file(&path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            result.map_err(|source| ApplyError::Io { path, source })?;
        }

        for dir in applied.created_dirs.into_iter().rev() {
            match std::fs::remove_dir(&dir) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    return Err(ApplyError::Io {
                        path: dir,
                        source: e,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Commit an accepted patch to the real repository.
    pub fn commit(
        &self,
        applied: &AppliedPatch,
        target: &CommitTarget,
        message: &str,
    ) -> Result<String, PipelineError> {
        git::commit_applied(&self.source_root, applied, target, message)
    }
}

/// Validate a patch path and normalize it to `/`-separated relative form.
pub fn safe_relative(path: &str) -> Result<String, ApplyError> {
    let unsafe_path = || ApplyError::UnsafePath {
        path: path.to_string(),
    };
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.contains('\0') || trimmed.contains('\\') {
        return Err(unsafe_path());
    }

    let mut parts = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(unsafe_path)?;
                if parts.is_empty() && part == ".git" {
                    return Err(unsafe_path());
                }
                parts.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path());
            }
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path());
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{FileChange, SearchReplaceBlock};
    use std::collections::BTreeMap;
    use std::fs;

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(dir.path().join("app/main.py"), "print('Hello Wolrd')\n").unwrap();
        fs::write(dir.path().join("README.md"), "# Demo\n").unwrap();
        dir
    }

    fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap().to_string_lossy().to_string();
                let bytes = if e.file_type().is_file() {
                    fs::read(e.path()).unwrap()
                } else {
                    b"<dir>".to_vec()
                };
                (rel, bytes)
            })
            .collect()
    }

    fn change(path: &str, edit: Edit) -> FileChange {
        FileChange {
            path: path.into(),
            edit,
        }
    }

    fn patch(changes: Vec<FileChange>) -> CandidatePatch {
        CandidatePatch { changes }
    }

    // ── create ──────────────────────────────────────────────────────────

    #[test]
    fn test_create_copies_without_git_dir() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        assert!(ws.root().join("app/main.py").is_file());
        assert!(!ws.root().join(".git").exists());
        assert_ne!(ws.root(), src.path());
    }

    // ── apply ───────────────────────────────────────────────────────────

    #[test]
    fn test_apply_all_edit_kinds() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let applied = ws
            .apply(&patch(vec![
                change(
                    "app/main.py",
                    Edit::SearchReplace(vec![SearchReplaceBlock {
                        search: "Wolrd".into(),
                        replace: "World".into(),
                    }]),
                ),
                change("app/new/util.py", Edit::FullContent("X = 1\n".into())),
                change("README.md", Edit::Delete),
            ]))
            .unwrap();

        assert_eq!(
            fs::read_to_string(ws.root().join("app/main.py")).unwrap(),
            "print('Hello World')\n"
        );
        assert!(ws.root().join("app/new/util.py").is_file());
        assert!(!ws.root().join("README.md").exists());
        assert_eq!(applied.changed_paths(), vec!["app/main.py", "app/new/util.py"]);
        assert_eq!(applied.deleted_paths(), vec!["README.md"]);
        // The source tree is untouched.
        assert_eq!(
            fs::read_to_string(src.path().join("app/main.py")).unwrap(),
            "print('Hello Wolrd')\n"
        );
    }

    #[test]
    fn test_conflict_writes_nothing() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let before = snapshot(ws.root());
        let err = ws
            .apply(&patch(vec![
                change("app/main.py", Edit::FullContent("changed\n".into())),
                change(
                    "README.md",
                    Edit::SearchReplace(vec![SearchReplaceBlock {
                        search: "not there".into(),
                        replace: "x".into(),
                    }]),
                ),
            ]))
            .unwrap_err();
        assert!(matches!(err, ApplyError::SearchNotFound { .. }));
        assert_eq!(snapshot(ws.root()), before);
    }

    #[test]
    fn test_incremental_edit_on_missing_file() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let err = ws
            .apply(&patch(vec![change(
                "nope.py",
                Edit::SearchReplace(vec![SearchReplaceBlock {
                    search: "a".into(),
                    replace: "b".into(),
                }]),
            )]))
            .unwrap_err();
        assert!(matches!(err, ApplyError::MissingFile { .. }));

        let err = ws.apply(&patch(vec![change("nope.py", Edit::Delete)])).unwrap_err();
        assert!(matches!(err, ApplyError::MissingFile { .. }));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        for bad in ["../escape.py", "/etc/passwd", ".git/config", "a/../../b", ""] {
            let err = ws
                .apply(&patch(vec![change(bad, Edit::FullContent("x".into()))]))
                .unwrap_err();
            assert!(matches!(err, ApplyError::UnsafePath { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn test_non_text_targets_are_conflicts() {
        let src = fixture();
        fs::write(src.path().join("legacy.py"), b"name = '\xe9t\xe9'\n").unwrap();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let before = snapshot(ws.root());

        for (path, reason) in [
            ("app", "is a directory"),
            ("README.md/inner.py", "a parent path is a regular file"),
            ("legacy.py", "not valid UTF-8"),
        ] {
            let err = ws
                .apply(&patch(vec![change(path, Edit::FullContent("x = 2\n".into()))]))
                .unwrap_err();
            assert!(err.is_conflict(), "{path}: {err:?}");
            match err {
                ApplyError::NotATextFile { reason: got, .. } => assert_eq!(got, reason),
                other => panic!("Expected NotATextFile for {path}, got {other:?}"),
            }
        }
        assert_eq!(snapshot(ws.root()), before);
    }

    #[test]
    fn test_credential_files_are_not_copied_or_written() {
        let src = fixture();
        fs::write(src.path().join(".env"), "GITHUB_TOKEN=ghp_SECRET123\n").unwrap();
        fs::write(src.path().join("app/tls.key"), "secret\n").unwrap();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        assert!(!ws.root().join(".env").exists());
        assert!(!ws.root().join("app/tls.key").exists());
        assert!(ws.root().join("app/main.py").is_file());

        for path in [".env", "config/.env.production", "certs/server.pem"] {
            let err = ws
                .apply(&patch(vec![change(path, Edit::FullContent("A=1\n".into()))]))
                .unwrap_err();
            assert!(matches!(err, ApplyError::ProtectedPath { .. }), "{path}: {err:?}");
        }
    }

    #[test]
    fn test_safe_relative_normalizes() {
        assert_eq!(safe_relative("./app//main.py").unwrap(), "app/main.py");
        assert_eq!(safe_relative("docs/.github/x.md").unwrap(), "docs/.github/x.md");
    }

    // ── rollback ────────────────────────────────────────────────────────

    #[test]
    fn test_rollback_is_byte_identical() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let before = snapshot(ws.root());

        let applied = ws
            .apply(&patch(vec![
                change("app/main.py", Edit::FullContent("print('x')\n".into())),
                change("deep/er/new.py", Edit::FullContent("y = 2\n".into())),
                change("README.md", Edit::Delete),
            ]))
            .unwrap();
        assert_ne!(snapshot(ws.root()), before);

        ws.rollback(applied).unwrap();
        assert_eq!(snapshot(ws.root()), before);
    }

    #[test]
    fn test_noop_edit_touches_nothing() {
        let src = fixture();
        let ws = ScopedWorkspace::create(src.path()).unwrap();
        let applied = ws
            .apply(&patch(vec![change(
                "README.md",
                Edit::FullContent("# Demo\n".into()),
            )]))
            .unwrap();
        assert!(applied.files.is_empty());
    }
}
