//! Units of pipeline work and branch naming.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::util::slugify;

/// What a task asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Generate a patch for an issue and open a change request.
    Generate,
    /// Review an existing change request.
    Review,
    /// Address review feedback on an existing change request.
    Revise,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Generate => write!(f, "generate"),
            TaskKind::Review => write!(f, "review"),
            TaskKind::Revise => write!(f, "revise"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "number", rename_all = "snake_case")]
pub enum TaskRef {
    Issue(u64),
    ChangeRequest(u64),
}

impl TaskRef {
    pub fn number(&self) -> u64 {
        match self {
            TaskRef::Issue(n) | TaskRef::ChangeRequest(n) => *n,
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskRef::Issue(n) => write!(f, "issue #{}", n),
            TaskRef::ChangeRequest(n) => write!(f, "change request #{}", n),
        }
    }
}

/// One unit of pipeline work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    kind: TaskKind,
    reference: TaskRef,
    repository: String,
    title: String,
    body: String,
}

impl Task {
    pub fn generate(repository: &str, issue: u64, title: &str, body: &str) -> Self {
        Self::new(TaskKind::Generate, TaskRef::Issue(issue), repository, title, body)
    }

    pub fn review(repository: &str, change_request: u64, title: &str, body: &str) -> Self {
        Self::new(
            TaskKind::Review,
            TaskRef::ChangeRequest(change_request),
            repository,
            title,
            body,
        )
    }

    pub fn revise(repository: &str, change_request: u64, title: &str, body: &str) -> Self {
        Self::new(
            TaskKind::Revise,
            TaskRef::ChangeRequest(change_request),
            repository,
            title,
            body,
        )
    }

    fn new(kind: TaskKind, reference: TaskRef, repository: &str, title: &str, body: &str) -> Self {
        Self {
            kind,
            reference,
            repository: repository.to_string(),
            title: title.trim().to_string(),
            body: body.trim().to_string(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn reference(&self) -> TaskRef {
        self.reference
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The task text as presented to the reasoning service.
    pub fn description(&self) -> String {
        let body = if self.body.is_empty() {
            "No description provided."
        } else {
            self.body.as_str()
        };
        format!("Title: {}\n\n{}", self.title, body)
    }

    /// Stable digest of everything that identifies this task.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.repository.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.kind.to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.reference.number().to_le_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.body.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn branch_seed(&self) -> BranchSeed {
        let prefix = match self.reference {
            TaskRef::Issue(n) => format!("issue-{n}"),
            TaskRef::ChangeRequest(n) => format!("pr-{n}"),
        };
        BranchSeed {
            prefix,
            slug: slugify(&self.title, 32),
            digest: self.content_hash()[..8].to_string(),
        }
    }
}

/// Deterministic part of a branch name, emitted with an accepted patch.
///
/// Uniqueness comes from the content digest plus a random suffix chosen at
/// publish time, so reruns of the same task never collide with earlier
/// branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSeed {
    prefix: String,
    slug: String,
    digest: String,
}

impl BranchSeed {
    pub const NAMESPACE: &'static str = "patchwright";

    pub fn branch_name(&self, suffix: &str) -> String {
        let mut name = format!("{}/{}", Self::NAMESPACE, self.prefix);
        if !self.slug.is_empty() {
            name.push('-');
            name.push_str(&self.slug);
        }
        format!("{}-{}-{}", name, self.digest, suffix)
    }

    /// Branch name with a fresh random suffix.
    pub fn unique_branch_name(&self) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.branch_name(&suffix[..6])
    }
}
