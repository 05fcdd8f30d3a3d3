//! Prompt templates for the plan step and generation attempts.
//!
//! - **Plan prompt**: asks for a short implementation plan before any attempt
//! - **Generation prompt**: task, plan, repository map, current contents of
//!   the files most likely to change and recent failures, asking for a JSON
//!   object of file edits

use super::history::FeedbackHistory;
use crate::oracle::OracleRequest;
use crate::repo_map::{FileContent, RepositoryContext, render_contents};
use crate::task::Task;

pub const PLAN_SYSTEM: &str = "You are a senior software engineer. Analyze the task and propose a \
concise implementation plan.\n\n\
Rules:\n\
1. Directly edit the existing files the task is about.\n\
2. Do not create helper scripts, utility files or automation tools.\n\
3. Make the minimal change that solves the task.\n\
4. Name the files to modify and the exact change for each.";

pub const GENERATE_SYSTEM: &str = "You are a coding agent. Output only one valid JSON object. \
Make minimal, direct changes to existing files.";

const FORMAT_INSTRUCTIONS: &str = "## Response format\n\n\
Return ONLY a JSON object whose keys are file paths relative to the repository root. \
Each value is one of:\n\
- the complete new file contents, as a string\n\
- SEARCH/REPLACE blocks, as a string:\n\
  `<<<<<<< SEARCH` / old lines / `=======` / new lines / `>>>>>>> REPLACE`\n\
  (each SEARCH section must match the current file exactly once)\n\
- `{\"diff\": \"<unified diff>\"}`\n\
- `{\"delete\": true}` to remove the file\n\n\
Do not create scripts that modify other files. Do not add explanations outside the JSON.\n\n\
Example: to fix the typo in a `main.py` containing `print(\"Hello Wolrd\")`, respond with\n\
`{\"main.py\": \"print(\\\"Hello World\\\")\\n\"}`\n";

/// Build the plan request.
pub fn plan_request(task: &Task, map: &str) -> OracleRequest {
    let prompt = format!(
        "## Task\n\n{}\n\n## Repository map\n\n{}",
        task.description(),
        map
    );
    OracleRequest::new(PLAN_SYSTEM, prompt)
}

/// Build the request for one generation attempt.
#[allow(clippy::too_many_arguments)]
pub fn generation_request(
    task: &Task,
    plan: Option<&str>,
    context: &RepositoryContext,
    contents: &[FileContent],
    context_cap: usize,
    history: &FeedbackHistory,
    attempt: u32,
    max_attempts: u32,
) -> OracleRequest {
    let mut prompt = String::new();

    prompt.push_str(&format!("## Task\n\n{}\n\n", task.description()));

    if let Some(plan) = plan.filter(|p| !p.trim().is_empty()) {
        prompt.push_str(&format!("## Plan\n\n{}\n\n", plan.trim()));
    }

    prompt.push_str("## Repository map\n\n");
    prompt.push_str(&context.render(context_cap));
    prompt.push('\n');

    if !contents.is_empty() {
        prompt.push_str("## Current file contents\n\n");
        prompt.push_str("SEARCH sections must quote these exactly.\n\n");
        prompt.push_str(&render_contents(contents));
    }

    if !history.is_empty() {
        prompt.push_str("## Previous attempts\n\n");
        prompt.push_str("These attempts were rejected. Do not repeat their mistakes.\n\n");
        for record in history.iter() {
            let diagnostics = record.diagnostics().unwrap_or("accepted");
            prompt.push_str(&format!(
                "### Attempt {}\n\n```\n{}\n```\n\n",
                record.index,
                diagnostics.trim_end()
            ));
        }
    }

    prompt.push_str(FORMAT_INSTRUCTIONS);
    prompt.push_str(&format!("\nThis is attempt {} of {}.\n", attempt, max_attempts));

    OracleRequest::new(GENERATE_SYSTEM, prompt)
}
