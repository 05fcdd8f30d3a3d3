//! End-to-end scenarios for the feedback loop against scripted responses.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use patchwright::clock::SteppingClock;
use patchwright::controller::{AttemptVerdict, ControllerSettings, FeedbackController};
use patchwright::errors::PipelineError;
use patchwright::oracle::{RetryPolicy, ScriptedOracle};
use patchwright::platform::{ChangeRequest, CheckRun, CheckStatus};
use patchwright::repo_map::{MapOptions, RepositoryMap};
use patchwright::review::{CiSummary, ReviewInput, ReviewSynthesizer, ReviewVerdict};
use patchwright::task::Task;
use patchwright::validate::{LintCommand, Validator, Verdict};
use patchwright::workspace::ScopedWorkspace;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const ORIGINAL: &str = "print('Hello Wolrd')\n";
const FIX: &str = r#"{"main.py": "print('Hello World')\n"}"#;
const BROKEN: &str = r#"{"main.py": "def broken(:\n    pass\n"}"#;

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("main.py"), ORIGINAL).unwrap();
    std::fs::create_dir(dir.path().join("lib")).unwrap();
    std::fs::write(
        dir.path().join("lib/greet.py"),
        "def greet(name):\n    return f'Hello {name}'\n",
    )
    .unwrap();
    dir
}

fn task() -> Task {
    Task::generate(
        "acme/widgets",
        1,
        "Typo in greeting",
        "main.py prints Wolrd instead of World",
    )
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

fn controller(oracle: Arc<ScriptedOracle>, validator: Validator) -> FeedbackController {
    controller_with(settings(), oracle, validator, CancellationToken::new())
}

fn controller_with(
    settings: ControllerSettings,
    oracle: Arc<ScriptedOracle>,
    validator: Validator,
    cancel: CancellationToken,
) -> FeedbackController {
    let clock = SteppingClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        chrono::Duration::seconds(1),
    );
    FeedbackController::new(settings, oracle, validator, Arc::new(clock), cancel)
}

/// A linter that takes a second and then reports every file it is given.
fn slow_lint(fails: bool) -> LintCommand {
    let script = if fails {
        "sleep 1; echo \"$1:1: E999 rejected\"; exit 1"
    } else {
        "sleep 1"
    };
    LintCommand {
        name: "slow".into(),
        extensions: vec!["py".into()],
        program: "sh".into(),
        args: vec!["-c".into(), script.into(), "lint".into(), "{file}".into()],
        blocking: true,
    }
}

/// Cancel `token` as soon as `path` differs from `original`.
fn cancel_when_changed(path: PathBuf, original: &'static str, token: CancellationToken) {
    tokio::spawn(async move {
        for _ in 0..1_000 {
            if std::fs::read_to_string(&path).is_ok_and(|text| text != original) {
                token.cancel();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
}

fn read(root: &Path, rel: &str) -> Vec<u8> {
    std::fs::read(root.join(rel)).unwrap()
}

// ── exhaustion ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_always_failing_service_exhausts_after_ceiling() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(BROKEN));

    let err = controller(oracle.clone(), Validator::syntax_only())
        .run(&task(), &ws, &[])
        .await
        .unwrap_err();

    let PipelineError::IterationsExhausted { total, attempts } = err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert_eq!(total, 3);
    assert_eq!(oracle.calls(), 3);
    let indices: Vec<u32> = attempts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(attempts.iter().all(|a| !a.verdict.is_accepted()));
    assert!(attempts.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn test_rejected_attempts_leave_workspace_byte_identical() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(
        r#"{"main.py": "def broken(:\n", "lib/new/extra.py": "x = (\n"}"#,
    ));

    controller(oracle, Validator::syntax_only())
        .run(&task(), &ws, &[])
        .await
        .unwrap_err();

    assert_eq!(read(ws.root(), "main.py"), ORIGINAL.as_bytes());
    assert!(!ws.root().join("lib/new").exists());
    assert_eq!(read(dir.path(), "main.py"), ORIGINAL.as_bytes());
}

#[tokio::test]
async fn test_only_most_recent_attempts_are_retained() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(BROKEN));
    let settings = ControllerSettings {
        history_len: 1,
        ..settings()
    };

    let err = controller_with(settings, oracle.clone(), Validator::syntax_only(), CancellationToken::new())
        .run(&task(), &ws, &[])
        .await
        .unwrap_err();

    let PipelineError::IterationsExhausted { total, attempts } = err else {
        panic!("expected exhaustion, got {err:?}");
    };
    assert_eq!(total, 3);
    let indices: Vec<u32> = attempts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![3]);
    // The third prompt replays only the retained failure.
    assert!(!oracle.prompts()[2].contains("### Attempt 1"));
    assert!(oracle.prompts()[2].contains("### Attempt 2"));
}

// ── cancellation ────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_after_apply_restores_workspace() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(FIX));
    let cancel = CancellationToken::new();
    cancel_when_changed(ws.root().join("main.py"), ORIGINAL, cancel.clone());

    let err = controller_with(
        settings(),
        oracle.clone(),
        Validator::new(vec![slow_lint(false)], Duration::from_secs(10)),
        cancel.clone(),
    )
    .run(&task(), &ws, &[])
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled), "{err:?}");
    assert!(cancel.is_cancelled());
    assert_eq!(oracle.calls(), 1);
    assert_eq!(read(ws.root(), "main.py"), ORIGINAL.as_bytes());
}

#[tokio::test]
async fn test_cancel_during_rejected_attempt_restores_workspace() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(
        r#"{"main.py": "print('Hello World')\n", "lib/extra.py": "X = 1\n"}"#,
    ));
    let cancel = CancellationToken::new();
    cancel_when_changed(ws.root().join("main.py"), ORIGINAL, cancel.clone());

    let err = controller_with(
        settings(),
        oracle.clone(),
        Validator::new(vec![slow_lint(true)], Duration::from_secs(10)),
        cancel,
    )
    .run(&task(), &ws, &[])
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled), "{err:?}");
    assert_eq!(oracle.calls(), 1);
    assert_eq!(read(ws.root(), "main.py"), ORIGINAL.as_bytes());
    assert!(!ws.root().join("lib/extra.py").exists());
}

// ── recovery ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unparseable_twice_then_valid() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::new(vec![
        Ok("I would change the greeting.".to_string()),
        Ok("{not json".to_string()),
        Ok(FIX.to_string()),
    ]));

    let accepted = controller(oracle.clone(), Validator::syntax_only())
        .run(&task(), &ws, &[])
        .await
        .unwrap();

    assert_eq!(accepted.attempts.len(), 3);
    assert!(accepted.attempts[2].verdict.is_accepted());
    assert_eq!(read(ws.root(), "main.py"), b"print('Hello World')\n");

    let third = &oracle.prompts()[2];
    let first_diag = accepted.attempts[0].diagnostics().unwrap();
    let second_diag = accepted.attempts[1].diagnostics().unwrap();
    assert!(first_diag.starts_with("unparseable response"));
    assert!(third.contains(first_diag));
    assert!(third.contains(second_diag));
    assert!(third.contains("This is attempt 3 of 3."));
}

#[tokio::test]
async fn test_first_attempt_accepted() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(FIX));

    let accepted = controller(oracle.clone(), Validator::syntax_only())
        .run(&task(), &ws, &["main.py".to_string()])
        .await
        .unwrap();

    assert_eq!(oracle.calls(), 1);
    assert_eq!(accepted.attempts.len(), 1);
    assert_eq!(accepted.report.verdict, Verdict::Pass);
    assert_eq!(accepted.applied.changed_paths(), vec!["main.py".to_string()]);
    // The real tree is untouched until publishing.
    assert_eq!(read(dir.path(), "main.py"), ORIGINAL.as_bytes());
}

#[tokio::test]
async fn test_empty_patch_is_rejected_as_no_op() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::new(vec![Ok("{}".to_string())]).with_fallback(FIX));

    let accepted = controller(oracle, Validator::syntax_only())
        .run(&task(), &ws, &[])
        .await
        .unwrap();

    assert_eq!(accepted.attempts.len(), 2);
    assert!(accepted.attempts[0]
        .diagnostics()
        .unwrap()
        .starts_with("no-op patch"));
}

#[tokio::test]
async fn test_non_text_targets_are_retried() {
    let dir = project();
    std::fs::write(dir.path().join("legacy.py"), b"name = '\xe9t\xe9'\n").unwrap();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(
        ScriptedOracle::new(vec![
            Ok(r#"{"lib": "x = 2\n"}"#.to_string()),
            Ok(r#"{"legacy.py": "name = 'ete'\n"}"#.to_string()),
        ])
        .with_fallback(FIX),
    );

    let accepted = controller(oracle, Validator::syntax_only())
        .run(&task(), &ws, &[])
        .await
        .unwrap();

    assert_eq!(accepted.attempts.len(), 3);
    let first = accepted.attempts[0].diagnostics().unwrap();
    let second = accepted.attempts[1].diagnostics().unwrap();
    assert!(first.contains("lib is not an editable text file: is a directory"), "{first}");
    assert!(second.contains("not valid UTF-8"), "{second}");
    assert!(ws.root().join("lib/greet.py").is_file());
    assert_eq!(read(ws.root(), "legacy.py"), b"name = '\xe9t\xe9'\n");
}

// ── prompt context ──────────────────────────────────────────────────

#[tokio::test]
async fn test_focus_file_body_reaches_the_prompt_after_rollback() {
    let dir = project();
    let body = "def greet(name): return 'Hello Wolrd ' + name\n";
    std::fs::write(dir.path().join("main.py"), body).unwrap();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::new(vec![Ok(BROKEN.to_string())]).with_fallback(
        r#"{"main.py": "def greet(name): return 'Hello World ' + name\n"}"#,
    ));

    controller(oracle.clone(), Validator::syntax_only())
        .run(&task(), &ws, &["main.py".to_string()])
        .await
        .unwrap();

    let prompts = oracle.prompts();
    for prompt in &prompts {
        assert!(prompt.contains("## Current file contents"));
        assert!(prompt.contains("'Hello Wolrd '"));
        assert!(!prompt.contains("def broken(:\n    pass\n```"));
    }
    // Other small source files are quoted too.
    assert!(prompts[0].contains("return f'Hello {name}'"));
}

#[tokio::test]
async fn test_credential_files_never_reach_the_prompt() {
    let dir = project();
    std::fs::write(dir.path().join(".env"), "GITHUB_TOKEN=ghp_SECRET123\n").unwrap();
    std::fs::write(dir.path().join("deploy.pem"), "-----BEGIN KEY-----\nSECRET\n").unwrap();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(FIX));

    controller(oracle.clone(), Validator::syntax_only())
        .run(&task(), &ws, &[".env".to_string()])
        .await
        .unwrap();

    assert!(!oracle.prompts()[0].contains("SECRET"));
    assert!(!oracle.prompts()[0].contains(".env"));
}

// ── validation ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_linter_passes_with_warnings() {
    let dir = project();
    let ws = ScopedWorkspace::create(dir.path()).unwrap();
    let oracle = Arc::new(ScriptedOracle::repeating(FIX));
    let lint = LintCommand {
        name: "phantom".into(),
        extensions: vec!["py".into()],
        program: "patchwright-test-no-such-linter".into(),
        args: vec!["{file}".into()],
        blocking: true,
    };

    let accepted = controller(oracle, Validator::new(vec![lint], Duration::from_secs(5)))
        .run(&task(), &ws, &[])
        .await
        .unwrap();

    assert_eq!(accepted.report.verdict, Verdict::PassWithWarnings);
    assert_eq!(accepted.report.unavailable.len(), 1);
    let AttemptVerdict::Accepted { warnings } = &accepted.attempts[0].verdict else {
        panic!("expected accepted verdict");
    };
    assert!(!warnings.is_empty());
}

// ── repository map ──────────────────────────────────────────────────

#[test]
fn test_repository_map_is_deterministic() {
    let dir = project();
    let map = RepositoryMap::new(MapOptions::default());
    let first = map.build(dir.path(), &[]).unwrap();
    let second = map.build(dir.path(), &[]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.render(10_000), second.render(10_000));

    let focused = map.build(dir.path(), &["main.py".to_string()]).unwrap();
    assert_eq!(focused.paths().next(), Some("main.py"));
}

// ── review ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pending_ci_review_is_indeterminate() {
    let oracle = Arc::new(ScriptedOracle::repeating(r#"{"status": "APPROVE"}"#));
    let synthesizer = ReviewSynthesizer::new(oracle.clone(), settings().retry, 10_000);
    let change_request = ChangeRequest {
        number: 9,
        url: "u".into(),
        title: "Fix typo".into(),
        body: "Closes #1".into(),
        head_branch: "patchwright/issue-1".into(),
        head_sha: "abc".into(),
        base_branch: "main".into(),
    };

    let review = synthesizer
        .synthesize(ReviewInput {
            change_request: &change_request,
            diff: "-Wolrd\n+World\n",
            linked_issue: None,
            ci: CiSummary::from_checks(vec![CheckRun {
                name: "build".into(),
                status: CheckStatus::Queued,
                conclusion: None,
                url: None,
            }]),
            lint: Vec::new(),
        })
        .await;

    assert_eq!(review.verdict, ReviewVerdict::Indeterminate);
    assert_eq!(oracle.calls(), 0);
}
