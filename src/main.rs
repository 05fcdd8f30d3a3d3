use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "patchwright")]
#[command(version, about = "Turns issues into validated patches and reviews change requests")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Repository as owner/name. Defaults to the configured remote's URL.
    #[arg(long, global = true, env = "PATCHWRIGHT_REPO")]
    pub repo: Option<String>,

    /// Commit locally but do not push, open change requests or post comments
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Attempt ceiling for the feedback loop. Overrides patchwright.toml.
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a patch for an issue and open a change request
    Fix {
        #[arg(long)]
        issue: u64,
    },
    /// Address review feedback on an existing change request
    Revise {
        #[arg(long)]
        pr: u64,
    },
    /// Review a change request and post the result as a comment
    Review {
        #[arg(long)]
        pr: u64,
    },
    /// Print the repository map the reasoning service would see
    Map {
        /// Directory to map (defaults to the project directory)
        path: Option<PathBuf>,
        /// Paths to list first
        #[arg(long)]
        focus: Vec<String>,
        /// Character cap for the rendered map. Overrides patchwright.toml.
        #[arg(long)]
        cap: Option<usize>,
        /// Print entries as JSON instead of the rendered map
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default patchwright.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Fix { issue } => cmd::cmd_fix(&cli, project_dir, *issue).await?,
        Commands::Revise { pr } => cmd::cmd_revise(&cli, project_dir, *pr).await?,
        Commands::Review { pr } => cmd::cmd_review(&cli, project_dir, *pr).await?,
        Commands::Map {
            path,
            focus,
            cap,
            json,
        } => {
            let _guard = patchwright::logging::init(cli.verbose, cli.json_logs, None);
            let root = path.clone().unwrap_or_else(|| project_dir.clone());
            cmd::cmd_map(&root, focus, *cap, *json)?
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
