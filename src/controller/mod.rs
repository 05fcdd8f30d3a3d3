//! The feedback-bounded refinement loop.
//!
//! One [`FeedbackController::run`] call drives a task through
//! [`ControllerState`]s until a candidate patch validates or the attempt
//! ceiling is reached:
//!
//! ```text
//! Init → Generating → Validating → Accepted
//!            ↑             ↓
//!            └──────── Retrying → Exhausted
//! ```
//!
//! Every rejected attempt is rolled back in the scoped workspace before the
//! next one starts, and its diagnostics are replayed into later prompts
//! through a bounded [`FeedbackHistory`].

pub mod history;
pub mod prompt;
pub mod state;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PatchwrightToml;
use crate::errors::PipelineError;
use crate::oracle::{OracleRequest, ReasoningClient, RetryPolicy, call_with_retry};
use crate::patch::{CandidatePatch, parse_response};
use crate::repo_map::{FileContent, MapOptions, RepositoryContext, RepositoryMap};
use crate::task::{BranchSeed, Task};
use crate::validate::{ValidationReport, Validator};
use crate::workspace::{AppliedPatch, ScopedWorkspace};

pub use history::{AttemptRecord, AttemptVerdict, FeedbackHistory};
pub use state::{ControllerState, Rejection};

/// Loop tuning, usually derived from the config file.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub max_attempts: u32,
    pub history_len: usize,
    pub context_cap: usize,
    pub retry: RetryPolicy,
    pub map: MapOptions,
    /// Ask for a plan before the first attempt
    pub plan: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&PatchwrightToml::default())
    }
}

impl ControllerSettings {
    pub fn from_config(config: &PatchwrightToml) -> Self {
        Self {
            max_attempts: config.loop_.max_attempts,
            history_len: config.loop_.history_len,
            context_cap: config.context.context_cap_chars,
            retry: config.loop_.retry_policy(),
            map: config.context.map_options(),
            plan: config.loop_.plan,
        }
    }
}

/// A validated patch, still applied in the scoped workspace.
#[derive(Debug)]
pub struct AcceptedPatch {
    pub patch: CandidatePatch,
    pub applied: AppliedPatch,
    pub report: ValidationReport,
    /// The most recent attempts of this run (at most `history_len`, never
    /// fewer than one), oldest first; the last one is the accepted one
    pub attempts: Vec<AttemptRecord>,
    pub branch_seed: BranchSeed,
    pub plan: Option<String>,
}

impl AcceptedPatch {
    /// 1-based index of the accepted attempt.
    pub fn attempt(&self) -> u32 {
        self.attempts.last().map_or(0, |a| a.index)
    }
}

/// Mutable data of one run, threaded through the state steps.
struct RunState<'a> {
    task: &'a Task,
    workspace: &'a ScopedWorkspace,
    focus: &'a [String],
    context: RepositoryContext,
    /// Full text of the files worth quoting, re-read with the map
    contents: Vec<FileContent>,
    plan: Option<String>,
    history: FeedbackHistory,
    /// Retained attempt records, newest last
    records: Vec<AttemptRecord>,
    retain: usize,
}

impl RunState<'_> {
    fn record(&mut self, record: AttemptRecord) {
        self.history.push(record.clone());
        self.records.push(record);
        if self.records.len() > self.retain {
            self.records.remove(0);
        }
    }
}

enum Evaluation {
    Accepted {
        patch: CandidatePatch,
        applied: AppliedPatch,
        report: ValidationReport,
    },
    Rejected {
        applied: Option<AppliedPatch>,
        diagnostics: String,
    },
}

pub struct FeedbackController {
    settings: ControllerSettings,
    oracle: Arc<dyn ReasoningClient>,
    validator: Validator,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

impl FeedbackController {
    pub fn new(
        settings: ControllerSettings,
        oracle: Arc<dyn ReasoningClient>,
        validator: Validator,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            oracle,
            validator,
            clock,
            cancel,
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Run `task` against `workspace` until a patch is accepted or attempts
    /// run out. `focus` paths are listed first in the repository map.
    ///
    /// On success the accepted patch is left applied in the workspace so the
    /// caller can commit it.
    pub async fn run(
        &self,
        task: &Task,
        workspace: &ScopedWorkspace,
        focus: &[String],
    ) -> Result<AcceptedPatch, PipelineError> {
        info!(
            task = %task.reference(),
            kind = %task.kind(),
            max_attempts = self.settings.max_attempts,
            "starting feedback loop"
        );

        let mut run = RunState {
            task,
            workspace,
            focus,
            context: RepositoryContext::default(),
            contents: Vec::new(),
            plan: None,
            history: FeedbackHistory::new(self.settings.history_len),
            records: Vec::new(),
            retain: self.settings.history_len.max(1),
        };

        let mut state = ControllerState::Init;
        loop {
            state = match state {
                ControllerState::Accepted(accepted) => {
                    info!(
                        attempts = accepted.attempts.len(),
                        files = accepted.applied.files.len(),
                        verdict = %accepted.report.verdict,
                        "patch accepted"
                    );
                    return Ok(*accepted);
                }
                ControllerState::Exhausted => {
                    let total = run.records.last().map_or(0, |r| r.index);
                    warn!(attempts = total, "attempts exhausted");
                    return Err(PipelineError::IterationsExhausted {
                        total,
                        attempts: run.records,
                    });
                }
                other => {
                    debug!(state = %other, "controller step");
                    self.step(other, &mut run).await?
                }
            };
        }
    }

    async fn step(
        &self,
        current: ControllerState,
        run: &mut RunState<'_>,
    ) -> Result<ControllerState, PipelineError> {
        match current {
            ControllerState::Init => {
                self.refresh_context(run)?;
                if self.settings.plan {
                    run.plan = self.plan(run).await?;
                }
                Ok(state::first_attempt(self.settings.max_attempts))
            }

            ControllerState::Generating { attempt } => {
                self.check_cancelled()?;
                let request = prompt::generation_request(
                    run.task,
                    run.plan.as_deref(),
                    &run.context,
                    &run.contents,
                    self.settings.context_cap,
                    &run.history,
                    attempt,
                    self.settings.max_attempts,
                );
                debug!(attempt, prompt_chars = request.size(), "requesting candidate patch");

                match self.call(&request).await? {
                    Ok(response) => Ok(ControllerState::Validating {
                        attempt,
                        prompt: request.prompt,
                        response,
                    }),
                    Err(e) => {
                        warn!(attempt, error = %e, "reasoning service failed");
                        Ok(ControllerState::Retrying {
                            attempt,
                            rejection: Rejection {
                                prompt: request.prompt,
                                response: String::new(),
                                applied: None,
                                diagnostics: PipelineError::TransientService(e).to_string(),
                            },
                        })
                    }
                }
            }

            ControllerState::Validating {
                attempt,
                prompt,
                response,
            } => {
                self.check_cancelled()?;
                match self.evaluate(run.workspace, &response).await? {
                    Evaluation::Accepted {
                        patch,
                        applied,
                        report,
                    } => {
                        if self.cancel.is_cancelled() {
                            run.workspace.rollback(applied)?;
                            return Err(PipelineError::Cancelled);
                        }
                        let record = AttemptRecord {
                            index: attempt,
                            prompt,
                            response,
                            verdict: AttemptVerdict::Accepted {
                                warnings: report.warnings(),
                            },
                            timestamp: self.clock.now(),
                        };
                        run.record(record);
                        Ok(ControllerState::Accepted(Box::new(AcceptedPatch {
                            patch,
                            applied,
                            report,
                            attempts: std::mem::take(&mut run.records),
                            branch_seed: run.task.branch_seed(),
                            plan: run.plan.clone(),
                        })))
                    }
                    Evaluation::Rejected {
                        applied,
                        diagnostics,
                    } => {
                        info!(attempt, diagnostics = %diagnostics, "candidate rejected");
                        Ok(ControllerState::Retrying {
                            attempt,
                            rejection: Rejection {
                                prompt,
                                response,
                                applied,
                                diagnostics,
                            },
                        })
                    }
                }
            }

            ControllerState::Retrying { attempt, rejection } => {
                if let Some(applied) = rejection.applied {
                    run.workspace.rollback(applied)?;
                }
                let record = AttemptRecord {
                    index: attempt,
                    prompt: rejection.prompt,
                    response: rejection.response,
                    verdict: AttemptVerdict::Rejected {
                        diagnostics: rejection.diagnostics,
                    },
                    timestamp: self.clock.now(),
                };
                run.record(record);

                self.check_cancelled()?;
                let next = state::transition(attempt, self.settings.max_attempts);
                if matches!(next, ControllerState::Generating { .. }) {
                    self.refresh_context(run)?;
                }
                Ok(next)
            }

            terminal @ (ControllerState::Accepted(_) | ControllerState::Exhausted) => Ok(terminal),
        }
    }

    fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            info!("task cancelled");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Call the service, racing it against cancellation. The outer result is
    /// `Err` only for cancellation; service failures are the inner `Err`.
    async fn call(
        &self,
        request: &OracleRequest,
    ) -> Result<Result<String, crate::errors::OracleError>, PipelineError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            result = call_with_retry(self.oracle.as_ref(), request, &self.settings.retry) => Ok(result),
        }
    }

    /// Rebuild the map and re-read file contents from the scoped copy.
    fn refresh_context(&self, run: &mut RunState<'_>) -> Result<(), PipelineError> {
        let root = run.workspace.root();
        let context = RepositoryMap::new(self.settings.map.clone()).build(root, run.focus)?;
        run.contents = context.current_contents(root, run.focus, self.settings.context_cap);
        debug!(
            files = context.len(),
            quoted = run.contents.len(),
            "repository context built"
        );
        run.context = context;
        Ok(())
    }

    /// Ask for an implementation plan. Service failures degrade to no plan.
    async fn plan(&self, run: &RunState<'_>) -> Result<Option<String>, PipelineError> {
        let map = run.context.render(self.settings.context_cap);
        let request = prompt::plan_request(run.task, &map);
        match self.call(&request).await? {
            Ok(plan) if !plan.trim().is_empty() => {
                info!(chars = plan.len(), "plan received");
                Ok(Some(plan.trim().to_string()))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "plan step failed, continuing without a plan");
                Ok(None)
            }
        }
    }

    /// Parse, apply and validate one response. Only I/O failures are `Err`.
    async fn evaluate(
        &self,
        workspace: &ScopedWorkspace,
        response: &str,
    ) -> Result<Evaluation, PipelineError> {
        let rejected = |diagnostics: String| Evaluation::Rejected {
            applied: None,
            diagnostics,
        };

        let patch = match parse_response(response) {
            Ok(patch) => patch,
            Err(e) => {
                let diagnostics = PipelineError::UnparseablePatch(e.to_string()).to_string();
                return Ok(rejected(diagnostics));
            }
        };
        if patch.is_empty() {
            return Ok(rejected(
                "no-op patch: the response contained no file changes".to_string(),
            ));
        }
        debug!(patch = %patch.summary(), "applying candidate");

        let applied = match workspace.apply(&patch) {
            Ok(applied) => applied,
            Err(e) if e.is_conflict() => {
                return Ok(rejected(format!("patch does not apply: {}", e)));
            }
            Err(e) => return Err(e.into()),
        };
        if applied.files.is_empty() {
            return Ok(rejected(
                "no-op patch: every edit leaves its file unchanged".to_string(),
            ));
        }

        let report = self
            .validator
            .validate(workspace.root(), &applied.changed_paths())
            .await;

        if report.accepted() {
            Ok(Evaluation::Accepted {
                patch,
                applied,
                report,
            })
        } else {
            Ok(Evaluation::Rejected {
                applied: Some(applied),
                diagnostics: report.diagnostics_text(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::errors::OracleError;
    use crate::oracle::ScriptedOracle;
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::time::Duration;

    const FIX: &str = r#"{"main.py": "print('Hello World')\n"}"#;

    fn repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('Hello Wolrd')\n").unwrap();
        dir
    }

    fn settings() -> ControllerSettings {
        ControllerSettings {
            plan: false,
            retry: RetryPolicy {
                timeout: Duration::from_secs(5),
                retries: 0,
                backoff_base: Duration::from_millis(1),
            },
            ..ControllerSettings::default()
        }
    }

    fn controller(oracle: Arc<ScriptedOracle>, settings: ControllerSettings) -> FeedbackController {
        let clock = SteppingClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            chrono::Duration::seconds(1),
        );
        FeedbackController::new(
            settings,
            oracle,
            Validator::syntax_only(),
            Arc::new(clock),
            CancellationToken::new(),
        )
    }

    fn task() -> Task {
        Task::generate("o/r", 1, "Fix typo", "main.py prints Wolrd")
    }

    fn read(root: &Path, path: &str) -> String {
        std::fs::read_to_string(root.join(path)).unwrap()
    }

    #[tokio::test]
    async fn test_accepts_first_valid_patch() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(ScriptedOracle::repeating(FIX));
        let accepted = controller(oracle.clone(), settings())
            .run(&task(), &ws, &[])
            .await
            .unwrap();

        assert_eq!(accepted.attempts.len(), 1);
        assert!(accepted.attempts[0].verdict.is_accepted());
        assert_eq!(oracle.calls(), 1);
        assert_eq!(read(ws.root(), "main.py"), "print('Hello World')\n");
        // The real repository is untouched until commit.
        assert_eq!(read(dir.path(), "main.py"), "print('Hello Wolrd')\n");
    }

    #[tokio::test]
    async fn test_syntax_failure_is_rolled_back_and_retried() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(ScriptedOracle::new(vec![
            Ok(r#"{"main.py": "print('Hello World'\n"}"#.into()),
            Ok(FIX.into()),
        ]));
        let accepted = controller(oracle.clone(), settings())
            .run(&task(), &ws, &[])
            .await
            .unwrap();

        assert_eq!(accepted.attempts.len(), 2);
        let first = accepted.attempts[0].diagnostics().unwrap();
        assert!(first.starts_with("syntax error: main.py"), "{first}");
        assert!(oracle.prompts()[1].contains(first));
        assert!(accepted.attempts[0].timestamp < accepted.attempts[1].timestamp);
    }

    #[tokio::test]
    async fn test_plan_is_included_in_prompts() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(
            ScriptedOracle::new(vec![Ok("Change Wolrd to World in main.py".into())])
                .with_fallback(FIX),
        );
        let accepted = controller(oracle.clone(), ControllerSettings { plan: true, ..settings() })
            .run(&task(), &ws, &[])
            .await
            .unwrap();

        assert_eq!(accepted.plan.as_deref(), Some("Change Wolrd to World in main.py"));
        let requests = oracle.requests();
        assert_eq!(requests[0].system, prompt::PLAN_SYSTEM);
        assert!(requests[1].prompt.contains("## Plan\n\nChange Wolrd to World"));
    }

    #[tokio::test]
    async fn test_plan_failure_is_not_fatal() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(
            ScriptedOracle::new(vec![Err(OracleError::Auth("bad key".into()))]).with_fallback(FIX),
        );
        let accepted = controller(oracle, ControllerSettings { plan: true, ..settings() })
            .run(&task(), &ws, &[])
            .await
            .unwrap();
        assert!(accepted.plan.is_none());
        assert_eq!(accepted.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_service_error_counts_as_attempt() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(
            ScriptedOracle::new(vec![Err(OracleError::BadRequest {
                status: 400,
                body: "context too long".into(),
            })])
            .with_fallback(FIX),
        );
        let accepted = controller(oracle, settings()).run(&task(), &ws, &[]).await.unwrap();
        assert_eq!(accepted.attempts.len(), 2);
        assert_eq!(accepted.attempts[0].response, "");
        let diagnostics = accepted.attempts[0].diagnostics().unwrap();
        assert!(diagnostics.starts_with("reasoning service error: request rejected (HTTP 400)"));
        assert!(diagnostics.contains("context too long"));
    }

    #[tokio::test]
    async fn test_conflicting_edit_is_rejected() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(
            ScriptedOracle::new(vec![Ok(
                r#"{"main.py": "<<<<<<< SEARCH\nprint('nope')\n=======\nprint('x')\n>>>>>>> REPLACE"}"#
                    .into(),
            )])
            .with_fallback(FIX),
        );
        let accepted = controller(oracle, settings()).run(&task(), &ws, &[]).await.unwrap();
        assert!(
            accepted.attempts[0]
                .diagnostics()
                .unwrap()
                .starts_with("patch does not apply")
        );
    }

    #[tokio::test]
    async fn test_unchanged_content_is_no_op() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(ScriptedOracle::repeating(
            r#"{"main.py": "print('Hello Wolrd')\n"}"#,
        ));
        let err = controller(oracle, settings()).run(&task(), &ws, &[]).await.unwrap_err();
        match err {
            PipelineError::IterationsExhausted { total, attempts } => {
                assert_eq!(total, 3);
                assert!(attempts.iter().all(|a| a.diagnostics().unwrap().starts_with("no-op patch")));
            }
            other => panic!("Expected IterationsExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_ceiling_exhausts_without_calls() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(ScriptedOracle::repeating(FIX));
        let err = controller(oracle.clone(), ControllerSettings { max_attempts: 0, ..settings() })
            .run(&task(), &ws, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::IterationsExhausted { total: 0, .. }));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = repo();
        let ws = ScopedWorkspace::create(dir.path()).unwrap();
        let oracle = Arc::new(ScriptedOracle::repeating(FIX));
        let ctl = controller(oracle.clone(), settings());
        ctl.cancel.cancel();
        let err = ctl.run(&task(), &ws, &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(oracle.calls(), 0);
        assert_eq!(read(ws.root(), "main.py"), "print('Hello Wolrd')\n");
    }
}
