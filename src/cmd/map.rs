//! Repository map preview: `patchwright map`.

use anyhow::{Context, Result};
use std::path::Path;

pub fn cmd_map(root: &Path, focus: &[String], cap: Option<usize>, json: bool) -> Result<()> {
    use patchwright::config::{CONFIG_DIR, PatchwrightToml};
    use patchwright::repo_map::RepositoryMap;

    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    let toml = PatchwrightToml::load_or_default(&root.join(CONFIG_DIR))?;

    let context = RepositoryMap::new(toml.context.map_options()).build(&root, focus)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&context.entries)?);
    } else {
        let cap = cap.unwrap_or(toml.context.context_cap_chars);
        println!("{}", context.render(cap));
    }
    Ok(())
}
