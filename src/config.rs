//! Configuration for patchwright.
//!
//! Settings are read from `.patchwright/patchwright.toml` and layered:
//! file → environment → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [loop]
//! max_attempts = 3
//! history_len = 3
//! call_timeout_secs = 120
//! transient_retries = 2
//! backoff_base_ms = 500
//! plan = true
//!
//! [context]
//! context_cap_chars = 12000
//! excerpt_max_bytes = 2000
//! exclude = ["fixtures/**"]
//!
//! [llm]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o"
//! api_key_env = "LLM_API_KEY"
//!
//! [[validate.lint]]
//! name = "ruff"
//! extensions = ["py"]
//! program = "ruff"
//! args = ["check", "--select", "E,F", "--output-format", "concise", "{file}"]
//! blocking = false
//!
//! [platform]
//! api_base = "https://api.github.com"
//! token_env = "GITHUB_TOKEN"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::oracle::RetryPolicy;
use crate::repo_map::MapOptions;
use crate::validate::LintCommand;

/// Name of the per-project configuration directory.
pub const CONFIG_DIR: &str = ".patchwright";
/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "patchwright.toml";

/// Feedback loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Iteration ceiling for one task
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Number of past attempts replayed into each prompt
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// Timeout applied to every reasoning-service call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Extra tries for timeouts, rate limits and 5xx responses
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// First backoff delay; doubles on each transient retry
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Ask for an implementation plan before the first attempt
    #[serde(default = "default_true")]
    pub plan: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_history_len() -> usize {
    3
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_transient_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            history_len: default_history_len(),
            call_timeout_secs: default_call_timeout_secs(),
            transient_retries: default_transient_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            plan: true,
        }
    }
}

impl LoopConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.call_timeout_secs),
            retries: self.transient_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

/// Repository map settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Upper bound on the rendered map, in characters
    #[serde(default = "default_context_cap_chars")]
    pub context_cap_chars: usize,
    /// Non-source files at or below this size are included verbatim
    #[serde(default = "default_excerpt_max_bytes")]
    pub excerpt_max_bytes: u64,
    /// Extra glob patterns (relative to the repository root) to skip
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_context_cap_chars() -> usize {
    12_000
}

fn default_excerpt_max_bytes() -> u64 {
    2_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_cap_chars: default_context_cap_chars(),
            excerpt_max_bytes: default_excerpt_max_bytes(),
            exclude: Vec::new(),
        }
    }
}

impl ContextConfig {
    pub fn map_options(&self) -> MapOptions {
        MapOptions {
            excerpt_max_bytes: self.excerpt_max_bytes,
            exclude: self.exclude.clone(),
        }
    }
}

/// Reasoning service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    /// API key from the configured variable, falling back to `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Local validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateConfig {
    #[serde(default = "default_lints")]
    pub lint: Vec<LintCommand>,
    /// Per-linter subprocess timeout
    #[serde(default = "default_lint_timeout_secs")]
    pub lint_timeout_secs: u64,
}

fn default_lints() -> Vec<LintCommand> {
    vec![LintCommand::ruff()]
}

fn default_lint_timeout_secs() -> u64 {
    60
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            lint: default_lints(),
            lint_timeout_secs: default_lint_timeout_secs(),
        }
    }
}

/// Hosting platform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Base branch for new change requests; the repository default if unset
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_request_retries")]
    pub request_retries: u32,
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_request_retries() -> u32 {
    2
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token_env: default_token_env(),
            base_branch: None,
            remote: default_remote(),
            request_retries: default_request_retries(),
        }
    }
}

impl PlatformConfig {
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

/// Parsed `patchwright.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchwrightToml {
    #[serde(default, rename = "loop")]
    pub loop_: LoopConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub validate: ValidateConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

impl PatchwrightToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid patchwright.toml")
    }

    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();

        let mut numeric = |name: &str, slot: &mut u64| {
            if let Some(raw) = lookup(name) {
                match raw.trim().parse::<u64>() {
                    Ok(value) => *slot = value,
                    Err(_) => ignored.push(format!("Ignoring {}={}: not a number", name, raw)),
                }
            }
        };

        let mut max_attempts = u64::from(self.loop_.max_attempts);
        numeric("PATCHWRIGHT_MAX_ATTEMPTS", &mut max_attempts);
        self.loop_.max_attempts = u32::try_from(max_attempts).unwrap_or(u32::MAX);

        let mut history_len = self.loop_.history_len as u64;
        numeric("PATCHWRIGHT_HISTORY_LEN", &mut history_len);
        self.loop_.history_len = history_len as usize;

        numeric("PATCHWRIGHT_CALL_TIMEOUT_SECS", &mut self.loop_.call_timeout_secs);

        if let Some(model) = lookup("PATCHWRIGHT_MODEL").filter(|m| !m.trim().is_empty()) {
            self.llm.model = model;
        }
        if let Some(base_url) = lookup("LLM_BASE_URL").filter(|u| !u.trim().is_empty()) {
            self.llm.base_url = base_url;
        }
        if let Some(api_base) = lookup("PATCHWRIGHT_API_BASE").filter(|u| !u.trim().is_empty()) {
            self.platform.api_base = api_base;
        }

        ignored
    }

    /// Validate the configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.loop_.max_attempts == 0 {
            warnings.push("loop.max_attempts is 0: every task will fail immediately".to_string());
        }
        if self.loop_.history_len == 0 {
            warnings.push(
                "loop.history_len is 0: retries will not see earlier failures".to_string(),
            );
        }
        if self.loop_.call_timeout_secs == 0 {
            warnings.push("loop.call_timeout_secs is 0: every call will time out".to_string());
        }
        if self.context.context_cap_chars < 1_000 {
            warnings.push(format!(
                "context.context_cap_chars = {} is very small; the map will be mostly paths",
                self.context.context_cap_chars
            ));
        }
        for pattern in &self.context.exclude {
            if let Err(e) = glob::Pattern::new(pattern) {
                warnings.push(format!("Invalid exclude pattern '{}': {}", pattern, e));
            }
        }
        if !is_http_url(&self.llm.base_url) {
            warnings.push(format!(
                "llm.base_url '{}' is not an http(s) URL",
                self.llm.base_url
            ));
        }
        if !is_http_url(&self.platform.api_base) {
            warnings.push(format!(
                "platform.api_base '{}' is not an http(s) URL",
                self.platform.api_base
            ));
        }
        for lint in &self.validate.lint {
            if lint.program.trim().is_empty() {
                warnings.push(format!("Lint '{}' has no program", lint.name));
            }
            if lint.extensions.is_empty() {
                warnings.push(format!(
                    "Lint '{}' lists no extensions and will never run",
                    lint.name
                ));
            }
        }

        warnings
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Template written by `patchwright config init`.
pub fn default_toml() -> &'static str {
    r#"# patchwright configuration

[loop]
# Iteration ceiling per task
max_attempts = 3
# Past attempts replayed into each prompt
history_len = 3
call_timeout_secs = 120
transient_retries = 2
backoff_base_ms = 500
# Ask for an implementation plan before the first attempt
plan = true

[context]
context_cap_chars = 12000
excerpt_max_bytes = 2000
exclude = []

[llm]
base_url = "https://api.openai.com/v1"
model = "gpt-4o"
api_key_env = "LLM_API_KEY"
max_tokens = 4096

[[validate.lint]]
name = "ruff"
extensions = ["py"]
program = "ruff"
args = ["check", "--select", "E,F", "--output-format", "concise", "{file}"]
blocking = false

[platform]
api_base = "https://api.github.com"
token_env = "GITHUB_TOKEN"
# base_branch = "main"
"#
}

/// Resolved runtime configuration for one invocation.
#[derive(Debug, Clone)]
pub struct PatchwrightConfig {
    /// Repository the pipelines operate on
    pub project_dir: PathBuf,
    /// `.patchwright` directory inside the project
    pub config_dir: PathBuf,
    /// Parsed file with environment overrides applied
    pub toml: PatchwrightToml,
    /// `owner/name`, from `--repo` or the `origin` remote
    pub repo: Option<String>,
    pub verbose: bool,
    pub dry_run: bool,
}

impl PatchwrightConfig {
    /// Load configuration for a project directory (file → env).
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);

        // A missing .env is the common case.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let mut toml = PatchwrightToml::load_or_default(&config_dir)?;
        for warning in toml.apply_env_with(|name| std::env::var(name).ok()) {
            tracing::warn!("{}", warning);
        }

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            repo: None,
            verbose: false,
            dry_run: false,
        })
    }

    /// Load configuration with CLI overrides (file → env → CLI).
    pub fn with_cli_args(
        project_dir: PathBuf,
        repo: Option<String>,
        verbose: bool,
        dry_run: bool,
        max_attempts: Option<u32>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.repo = repo;
        config.verbose = verbose;
        config.dry_run = dry_run;
        if let Some(max_attempts) = max_attempts {
            config.toml.loop_.max_attempts = max_attempts;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Repository identifier, falling back to the `origin` remote URL.
    pub fn resolve_repo(&self) -> Result<String> {
        if let Some(repo) = &self.repo {
            return Ok(repo.clone());
        }
        let git_repo = git2::Repository::discover(&self.project_dir)
            .context("Not a git repository; pass --repo owner/name")?;
        let remote = git_repo
            .find_remote(&self.toml.platform.remote)
            .with_context(|| format!("No '{}' remote; pass --repo", self.toml.platform.remote))?;
        let url = remote
            .url()
            .context("Remote URL is not valid UTF-8")?;
        let (owner, name) = crate::platform::github::parse_owner_repo_from_url(url)?;
        Ok(format!("{}/{}", owner, name))
    }
}
