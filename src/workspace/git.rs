//! Git operations on the real repository.
//!
//! Committing uses git2 directly; network operations (fetch, push) shell out to
//! the `git` binary so the user's credential helpers apply.

use std::path::Path;
use std::process::Stdio;

use git2::{ErrorCode, Index, IndexEntry, IndexTime, Oid, Repository, Signature, Status};

use super::AppliedPatch;
use crate::errors::{PipelineError, PlatformError};

/// Where an accepted patch is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitTarget {
    /// Create this branch at HEAD, switch to it, and commit there.
    NewBranch(String),
    /// Commit on whatever branch is checked out.
    CurrentBranch,
}

fn git_err(context: &str, e: git2::Error) -> PipelineError {
    PipelineError::Git(format!("{}: {}", context, e.message()))
}

fn signature(repo: &Repository) -> Result<Signature<'static>, PipelineError> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Signature::now("patchwright", "patchwright@localhost")
            .map_err(|e| git_err("Failed to build commit signature", e)),
    }
}

/// Refuse to overwrite touched paths that differ from HEAD in the index or
/// the working tree.
fn ensure_clean(repo: &Repository, applied: &AppliedPatch) -> Result<(), PipelineError> {
    let dirty: Vec<&str> = applied
        .files
        .iter()
        .filter_map(|file| match repo.status_file(Path::new(&file.path)) {
            Ok(status) if status == Status::CURRENT => None,
            Err(e) if e.code() == ErrorCode::NotFound => None,
            _ => Some(file.path.as_str()),
        })
        .collect();
    if dirty.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::Git(format!(
            "uncommitted changes to {}; commit or stash them first",
            dirty.join(", ")
        )))
    }
}

fn blob_entry(path: &str, id: Oid, mode: u32, size: usize) -> IndexEntry {
    IndexEntry {
        ctime: IndexTime::new(0, 0),
        mtime: IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode,
        uid: 0,
        gid: 0,
        file_size: u32::try_from(size).unwrap_or(u32::MAX),
        id,
        flags: 0,
        flags_extended: 0,
        path: path.as_bytes().to_vec(),
    }
}

/// Tree of `head` with exactly the touched paths replaced. Whatever else the
/// user has staged stays out of it.
fn patched_tree(
    repo: &Repository,
    head: &git2::Commit<'_>,
    applied: &AppliedPatch,
) -> Result<Oid, PipelineError> {
    let head_tree = head.tree().map_err(|e| git_err("Failed to read HEAD tree", e))?;
    let mut index = Index::new().map_err(|e| git_err("Failed to create index", e))?;
    index
        .read_tree(&head_tree)
        .map_err(|e| git_err("Failed to load HEAD tree", e))?;

    for file in &applied.files {
        let rel = Path::new(&file.path);
        let staged = match &file.contents {
            Some(text) => {
                let mode = head_tree
                    .get_path(rel)
                    .map(|entry| entry.filemode() as u32)
                    .unwrap_or(0o100644);
                let id = repo
                    .blob(text.as_bytes())
                    .map_err(|e| git_err(&format!("Failed to write blob for {}", file.path), e))?;
                index.add(&blob_entry(&file.path, id, mode, text.len()))
            }
            None => index.remove(rel, 0),
        };
        staged.map_err(|e| git_err(&format!("Failed to stage {}", file.path), e))?;
    }

    index
        .write_tree_to(repo)
        .map_err(|e| git_err("Failed to write tree", e))
}

/// Commit exactly the accepted files on top of HEAD and write them into
/// `repo_root`. Returns the new commit sha.
///
/// The commit tree is HEAD's tree plus the touched paths, so changes the
/// user staged elsewhere stay staged and uncommitted.
pub fn commit_applied(
    repo_root: &Path,
    applied: &AppliedPatch,
    target: &CommitTarget,
    message: &str,
) -> Result<String, PipelineError> {
    let repo = Repository::open(repo_root).map_err(|e| git_err("Failed to open repository", e))?;
    let head = repo
        .head()
        .and_then(|h| h.peel_to_commit())
        .map_err(|e| git_err("Repository has no HEAD commit", e))?;
    let workdir = repo
        .workdir()
        .ok_or_else(|| PipelineError::Git("bare repositories are not supported".to_string()))?
        .to_path_buf();

    ensure_clean(&repo, applied)?;
    let tree_id = patched_tree(&repo, &head, applied)?;

    if let CommitTarget::NewBranch(name) = target {
        repo.branch(name, &head, false)
            .map_err(|e| git_err(&format!("Failed to create branch {}", name), e))?;
        // Same commit as HEAD, so the working tree is already correct.
        repo.set_head(&format!("refs/heads/{}", name))
            .map_err(|e| git_err(&format!("Failed to switch to branch {}", name), e))?;
    }

    for file in &applied.files {
        let path = workdir.join(&file.path);
        let result = match &file.contents {
            Some(text) => path
                .parent()
                .map_or(Ok(()), std::fs::create_dir_all)
                .and_then(|_| std::fs::write(&path, text)),
            None => match std::fs::remove_file(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        result.map_err(|source| PipelineError::Filesystem {
            path: path.clone(),
            source,
        })?;
    }

    let tree = repo
        .find_tree(tree_id)
        .map_err(|e| git_err("Failed to find tree", e))?;
    let sig = signature(&repo)?;
    let commit_id = repo
        .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&head])
        .map_err(|e| git_err("Failed to commit", e))?;

    // Bring the live index in line with the new HEAD for the touched paths only.
    let mut index = repo.index().map_err(|e| git_err("Failed to read index", e))?;
    for file in &applied.files {
        let rel = Path::new(&file.path);
        let staged = if file.deleted() {
            index.remove_path(rel)
        } else {
            index.add_path(rel)
        };
        staged.map_err(|e| git_err(&format!("Failed to stage {}", file.path), e))?;
    }
    index.write().map_err(|e| git_err("Failed to write index", e))?;

    tracing::info!(sha = %commit_id, files = applied.files.len(), "committed accepted patch");
    Ok(commit_id.to_string())
}

async fn run_git(repo_root: &Path, args: &[&str]) -> Result<(), String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("failed to run git {}: {}", args.join(" "), e))?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(())
}

/// Push `branch` to `remote`, setting upstream.
pub async fn push_branch(repo_root: &Path, remote: &str, branch: &str) -> Result<(), PlatformError> {
    run_git(repo_root, &["push", "-u", remote, branch])
        .await
        .map_err(|stderr| PlatformError::Push(format!("{} -> {}: {}", branch, remote, stderr)))
}

/// Fetch `branch` from `remote` and check it out locally, resetting any local
/// branch of the same name to the remote tip.
pub async fn checkout_remote_branch(
    repo_root: &Path,
    remote: &str,
    branch: &str,
) -> Result<(), PipelineError> {
    run_git(repo_root, &["fetch", remote, branch])
        .await
        .map_err(|e| PipelineError::Git(format!("Failed to fetch {}: {}", branch, e)))?;
    let tracking = format!("{}/{}", remote, branch);
    run_git(repo_root, &["checkout", "-B", branch, &tracking])
        .await
        .map_err(|e| PipelineError::Git(format!("Failed to check out {}: {}", branch, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{CandidatePatch, Edit, FileChange};
    use crate::workspace::ScopedWorkspace;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("main.py"), "print('Hello Wolrd')\n").unwrap();
        std::fs::write(dir.path().join("old.py"), "x = 1\n").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@localhost").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        dir
    }

    #[test]
    fn test_commit_to_new_branch_stages_only_touched_paths() {
        let dir = init_repo();
        std::fs::write(dir.path().join("scratch.txt"), "untracked\n").unwrap();

        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let applied = ws
            .apply(&CandidatePatch {
                changes: vec![
                    FileChange {
                        path: "main.py".into(),
                        edit: Edit::FullContent("print('Hello World')\n".into()),
                    },
                    FileChange {
                        path: "old.py".into(),
                        edit: Edit::Delete,
                    },
                ],
            })
            .unwrap();

        let sha = ws
            .commit(
                &applied,
                &CommitTarget::NewBranch("patchwright/issue-1-fix".into()),
                "Fix issue #1: typo",
            )
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap();
        assert_eq!(head.shorthand(), Some("patchwright/issue-1-fix"));
        let commit = head.peel_to_commit().unwrap();
        assert_eq!(commit.id().to_string(), sha);
        assert_eq!(commit.message(), Some("Fix issue #1: typo"));

        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("main.py")).is_ok());
        assert!(tree.get_path(Path::new("old.py")).is_err());
        assert!(tree.get_path(Path::new("scratch.txt")).is_err());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "print('Hello World')\n"
        );
    }

    fn fix_main(ws: &ScopedWorkspace) -> AppliedPatch {
        ws.apply(&CandidatePatch {
            changes: vec![FileChange {
                path: "main.py".into(),
                edit: Edit::FullContent("print('Hello World')\n".into()),
            }],
        })
        .unwrap()
    }

    #[test]
    fn test_commit_leaves_user_staged_changes_out() {
        let dir = init_repo();
        std::fs::write(dir.path().join("notes.txt"), "wip\n").unwrap();
        {
            let repo = Repository::open(dir.path()).unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("notes.txt")).unwrap();
            index.write().unwrap();
        }

        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let applied = fix_main(&ws);
        ws.commit(&applied, &CommitTarget::CurrentBranch, "Fix typo").unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("notes.txt")).is_err());
        assert!(tree.get_path(Path::new("old.py")).is_ok());
        let parent_tree = commit.parent(0).unwrap().tree().unwrap();
        let diff = repo
            .diff_tree_to_tree(Some(&parent_tree), Some(&tree), None)
            .unwrap();
        assert_eq!(diff.deltas().len(), 1);

        // The user's work is still staged, and the committed file is clean.
        assert!(repo.status_file(Path::new("notes.txt")).unwrap().contains(Status::INDEX_NEW));
        assert_eq!(repo.status_file(Path::new("main.py")).unwrap(), Status::CURRENT);
    }

    #[test]
    fn test_dirty_touched_path_is_refused() {
        let dir = init_repo();
        std::fs::write(dir.path().join("main.py"), "print('local edit')\n").unwrap();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let applied = fix_main(&ws);

        let err = ws
            .commit(&applied, &CommitTarget::NewBranch("patchwright/x".into()), "Fix")
            .unwrap_err();
        match err {
            PipelineError::Git(msg) => assert!(msg.contains("uncommitted changes to main.py"), "{msg}"),
            other => panic!("Expected Git error, got {other:?}"),
        }
        let repo = Repository::open(dir.path()).unwrap();
        assert_ne!(repo.head().unwrap().shorthand(), Some("patchwright/x"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("main.py")).unwrap(),
            "print('local edit')\n"
        );
    }

    #[test]
    fn test_existing_branch_name_is_git_error() {
        let dir = init_repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let applied = AppliedPatch::default();
        let target = CommitTarget::NewBranch("dup".into());
        {
            let repo = Repository::open(dir.path()).unwrap();
            let head = repo.head().unwrap().peel_to_commit().unwrap();
            repo.branch("dup", &head, false).unwrap();
        }
        let err = ws.commit(&applied, &target, "msg").unwrap_err();
        assert!(matches!(err, PipelineError::Git(_)));
    }

    #[tokio::test]
    async fn test_push_without_remote_fails() {
        let dir = init_repo();
        let err = push_branch(dir.path(), "origin", "main").await.unwrap_err();
        assert!(matches!(err, PlatformError::Push(_)));
    }
}
