//! In-process platform double used by tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{ChangeRequest, CheckRun, Comment, HostingPlatform, Issue, NewChangeRequest};
use crate::errors::PlatformError;

#[derive(Debug, Default)]
struct Store {
    issues: HashMap<u64, Issue>,
    change_requests: HashMap<u64, ChangeRequest>,
    diffs: HashMap<u64, String>,
    files: HashMap<u64, Vec<String>>,
    commits: HashMap<u64, u32>,
    checks: HashMap<String, Vec<CheckRun>>,
    comments: HashMap<u64, Vec<Comment>>,
    opened: Vec<NewChangeRequest>,
    next_number: u64,
}

/// Keeps everything in memory and records every write.
#[derive(Debug)]
pub struct InMemoryPlatform {
    repository: String,
    default_branch: String,
    store: Mutex<Store>,
}

impl InMemoryPlatform {
    pub fn new(repository: &str) -> Self {
        Self {
            repository: repository.to_string(),
            default_branch: "main".to_string(),
            store: Mutex::new(Store {
                next_number: 100,
                ..Store::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_issue(self, number: u64, title: &str, body: &str) -> Self {
        self.lock().issues.insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                url: format!("https://example.test/{}/issues/{}", self.repository, number),
            },
        );
        self
    }

    pub fn with_change_request(
        self,
        change_request: ChangeRequest,
        diff: &str,
        files: &[&str],
        commits: u32,
    ) -> Self {
        {
            let mut store = self.lock();
            let n = change_request.number;
            store.diffs.insert(n, diff.to_string());
            store
                .files
                .insert(n, files.iter().map(|f| f.to_string()).collect());
            store.commits.insert(n, commits);
            store.change_requests.insert(n, change_request);
        }
        self
    }

    pub fn with_checks(self, head_sha: &str, checks: Vec<CheckRun>) -> Self {
        self.lock().checks.insert(head_sha.to_string(), checks);
        self
    }

    pub fn with_comment(self, number: u64, author: &str, body: &str) -> Self {
        self.lock().comments.entry(number).or_default().push(Comment {
            author: author.to_string(),
            body: body.to_string(),
            created_at: None,
        });
        self
    }

    pub fn opened(&self) -> Vec<NewChangeRequest> {
        self.lock().opened.clone()
    }

    pub fn comments_on(&self, number: u64) -> Vec<Comment> {
        self.lock().comments.get(&number).cloned().unwrap_or_default()
    }
}

fn not_found(resource: String) -> PlatformError {
    PlatformError::NotFound { resource }
}

#[async_trait]
impl HostingPlatform for InMemoryPlatform {
    fn repository(&self) -> &str {
        &self.repository
    }

    async fn fetch_issue(&self, number: u64) -> Result<Issue, PlatformError> {
        self.lock()
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| not_found(format!("issue #{}", number)))
    }

    async fn fetch_change_request(&self, number: u64) -> Result<ChangeRequest, PlatformError> {
        self.lock()
            .change_requests
            .get(&number)
            .cloned()
            .ok_or_else(|| not_found(format!("change request #{}", number)))
    }

    async fn open_change_request(
        &self,
        request: &NewChangeRequest,
    ) -> Result<ChangeRequest, PlatformError> {
        let mut store = self.lock();
        if store
            .change_requests
            .values()
            .any(|cr| cr.head_branch == request.head)
        {
            return Err(PlatformError::AlreadyExists(request.head.clone()));
        }
        let number = store.next_number;
        store.next_number += 1;
        let cr = ChangeRequest {
            number,
            url: format!("https://example.test/{}/pull/{}", self.repository, number),
            title: request.title.clone(),
            body: request.body.clone(),
            head_branch: request.head.clone(),
            head_sha: String::new(),
            base_branch: request.base.clone(),
        };
        store.change_requests.insert(number, cr.clone());
        store.opened.push(request.clone());
        Ok(cr)
    }

    async fn fetch_diff(&self, number: u64) -> Result<String, PlatformError> {
        self.lock()
            .diffs
            .get(&number)
            .cloned()
            .ok_or_else(|| not_found(format!("diff of #{}", number)))
    }

    async fn fetch_check_statuses(&self, head_sha: &str) -> Result<Vec<CheckRun>, PlatformError> {
        Ok(self.lock().checks.get(head_sha).cloned().unwrap_or_default())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.lock().comments.entry(number).or_default().push(Comment {
            author: "patchwright".to_string(),
            body: body.to_string(),
            created_at: None,
        });
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<Comment>, PlatformError> {
        Ok(self.comments_on(number))
    }

    async fn count_commits(&self, number: u64) -> Result<u32, PlatformError> {
        Ok(self.lock().commits.get(&number).copied().unwrap_or(0))
    }

    async fn changed_files(&self, number: u64) -> Result<Vec<String>, PlatformError> {
        Ok(self.lock().files.get(&number).cloned().unwrap_or_default())
    }

    async fn default_branch(&self) -> Result<String, PlatformError> {
        Ok(self.default_branch.clone())
    }
}
