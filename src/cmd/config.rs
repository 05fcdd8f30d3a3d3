//! Configuration view and validation commands: `patchwright config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use patchwright::config::{CONFIG_DIR, CONFIG_FILE, PatchwrightConfig, PatchwrightToml, default_toml};

    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Patchwright Configuration");
            println!("=========================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                PatchwrightToml::load(&config_path)?
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
                PatchwrightToml::default()
            };
            println!();

            println!("[loop]");
            println!("  max_attempts = {}", toml.loop_.max_attempts);
            println!("  history_len = {}", toml.loop_.history_len);
            println!("  call_timeout_secs = {}", toml.loop_.call_timeout_secs);
            println!("  transient_retries = {}", toml.loop_.transient_retries);
            println!("  backoff_base_ms = {}", toml.loop_.backoff_base_ms);
            println!("  plan = {}", toml.loop_.plan);
            println!();

            println!("[context]");
            println!("  context_cap_chars = {}", toml.context.context_cap_chars);
            println!("  excerpt_max_bytes = {}", toml.context.excerpt_max_bytes);
            if !toml.context.exclude.is_empty() {
                println!("  exclude = {:?}", toml.context.exclude);
            }
            println!();

            println!("[llm]");
            println!("  base_url = \"{}\"", toml.llm.base_url);
            println!("  model = \"{}\"", toml.llm.model);
            println!("  api_key_env = \"{}\"", toml.llm.api_key_env);
            println!();

            println!("[validate]");
            println!("  lint_timeout_secs = {}", toml.validate.lint_timeout_secs);
            for lint in &toml.validate.lint {
                println!(
                    "  lint \"{}\": {} {} ({}, {})",
                    lint.name,
                    lint.program,
                    lint.args.join(" "),
                    lint.extensions.join(","),
                    if lint.blocking { "blocking" } else { "advisory" }
                );
            }
            println!();

            println!("[platform]");
            println!("  api_base = \"{}\"", toml.platform.api_base);
            println!("  token_env = \"{}\"", toml.platform.token_env);
            println!("  remote = \"{}\"", toml.platform.remote);
            if let Some(base) = &toml.platform.base_branch {
                println!("  base_branch = \"{}\"", base);
            }
            println!();

            // Effective values after environment overrides
            let config = PatchwrightConfig::new(project_dir.to_path_buf())?;
            println!("Effective values (with env overrides):");
            println!("  llm.model = \"{}\"", config.toml.llm.model);
            println!("  loop.max_attempts = {}", config.toml.loop_.max_attempts);
            println!(
                "  llm api key: {}",
                if config.toml.llm.api_key().is_some() { "set" } else { "not set" }
            );
            println!(
                "  platform token: {}",
                if config.toml.platform.token().is_some() { "set" } else { "not set" }
            );
            println!();
            if !config_path.exists() {
                println!("Run 'patchwright config init' to create a {} file.", CONFIG_FILE);
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = PatchwrightToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_dir)?;
            std::fs::write(&config_path, default_toml())?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [loop] max_attempts, history_len, timeouts");
            println!("  - [llm] base_url, model, api_key_env");
            println!("  - [[validate.lint]] entries for your languages");
            println!();
        }
    }

    Ok(())
}
