//! Task commands: `patchwright fix`, `patchwright revise` and
//! `patchwright review`.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use patchwright::config::PatchwrightConfig;
use patchwright::controller::{AcceptedPatch, AttemptRecord, AttemptVerdict};
use patchwright::errors::PipelineError;
use patchwright::pipeline::{Pipeline, ReviseReport};
use patchwright::publish::PublishOutcome;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;

use super::super::Cli;

/// Configuration, logging and collaborators shared by the task commands.
struct Session {
    pipeline: Pipeline,
    _log_guard: Option<WorkerGuard>,
}

fn start_session(cli: &Cli, project_dir: PathBuf) -> Result<Session> {
    use patchwright::clock::SystemClock;
    use patchwright::oracle::HttpReasoningClient;
    use patchwright::platform::GitHubPlatform;

    let config = PatchwrightConfig::with_cli_args(
        project_dir,
        cli.repo.clone(),
        cli.verbose,
        cli.dry_run,
        cli.max_attempts,
    )?;
    let log_guard = patchwright::logging::init(cli.verbose, cli.json_logs, Some(&config.log_dir()));

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let repo = config.resolve_repo()?;
    let platform = GitHubPlatform::from_config(&config.toml.platform, &repo);
    if !platform.has_token() {
        tracing::warn!(
            token_env = %config.toml.platform.token_env,
            "no platform token set; only public reads will work"
        );
    }
    let oracle = HttpReasoningClient::from_config(&config.toml.llm)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    Ok(Session {
        pipeline: Pipeline::new(
            config,
            Arc::new(platform),
            Arc::new(oracle),
            Arc::new(SystemClock),
            cancel,
        ),
        _log_guard: log_guard,
    })
}

pub async fn cmd_fix(cli: &Cli, project_dir: PathBuf, issue: u64) -> Result<()> {
    let session = start_session(cli, project_dir)?;
    match session.pipeline.fix_issue(issue).await {
        Ok(report) => {
            print_accepted(&report.accepted);
            print_outcome(&report.outcome);
            Ok(())
        }
        Err(e) => Err(report_failure(e)),
    }
}

pub async fn cmd_revise(cli: &Cli, project_dir: PathBuf, pr: u64) -> Result<()> {
    let session = start_session(cli, project_dir)?;
    match session.pipeline.revise(pr).await {
        Ok(ReviseReport::Revised { accepted, outcome }) => {
            print_accepted(&accepted);
            print_outcome(&outcome);
            Ok(())
        }
        Ok(ReviseReport::LimitReached { commits }) => {
            println!(
                "{} change request #{} already has {} commit(s); left for manual review.",
                console::style("Limit reached:").yellow().bold(),
                pr,
                commits
            );
            Ok(())
        }
        Ok(ReviseReport::NothingToRevise) => {
            println!("Change request #{} touches no files; nothing to revise.", pr);
            Ok(())
        }
        Err(e) => Err(report_failure(e)),
    }
}

pub async fn cmd_review(cli: &Cli, project_dir: PathBuf, pr: u64) -> Result<()> {
    let session = start_session(cli, project_dir)?;
    let report = session.pipeline.review(pr).await?;

    println!(
        "{} {}",
        console::style("Verdict:").bold(),
        console::style(report.review.verdict).cyan()
    );
    if report.posted {
        println!("Review posted on change request #{}.", pr);
    } else {
        println!();
        println!("{}", report.comment);
    }
    Ok(())
}

fn print_accepted(accepted: &AcceptedPatch) {
    println!(
        "{} after {} attempt(s) ({})",
        console::style("Patch accepted").green().bold(),
        accepted.attempt(),
        accepted.report.verdict
    );
    for path in accepted.applied.changed_paths() {
        println!("  {}", path);
    }
    for warning in accepted.report.warnings() {
        println!("  {} {}", console::style("⚠").yellow(), warning);
    }
}

fn print_outcome(outcome: &PublishOutcome) {
    match outcome {
        PublishOutcome::Opened {
            change_request,
            sha,
        } => {
            println!(
                "Opened change request #{} ({}) at {}",
                change_request.number,
                change_request.url,
                short_sha(sha)
            );
        }
        PublishOutcome::Updated { branch, sha } => {
            println!("Pushed {} to {}", short_sha(sha), branch);
        }
        PublishOutcome::DryRun { branch, sha } => {
            println!(
                "{} committed {} on {}; nothing pushed",
                console::style("Dry run:").dim(),
                short_sha(sha),
                branch
            );
        }
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

/// Print the attempt history of an exhausted loop, then hand the error back.
fn report_failure(err: PipelineError) -> anyhow::Error {
    if let PipelineError::IterationsExhausted { attempts, .. } = &err {
        println!("{}", console::style("No acceptable patch").red().bold());
        for record in attempts {
            print_attempt(record);
        }
    }
    err.into()
}

fn print_attempt(record: &AttemptRecord) {
    let label = format!("Attempt {}", record.index);
    match &record.verdict {
        AttemptVerdict::Accepted { .. } => {
            println!("  {} accepted", console::style(label).green());
        }
        AttemptVerdict::Rejected { diagnostics } => {
            println!(
                "  {} rejected at {}",
                console::style(label).red(),
                record.timestamp.format("%H:%M:%S")
            );
            for line in diagnostics.lines() {
                println!("    {}", console::style(line).dim());
            }
        }
    }
}
