//! `.fuel/` directory conventions and the `init` scaffold.
//!
//! Configuration parsing itself lives in `fuel_core::config`; this module
//! only owns path resolution local to the CLI and the starter file this
//! binary writes for `fuel init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fuel_core::ConfigFile;

/// `.fuel/` under `cwd`, the root of the on-disk store and config.
pub fn fuel_dir(cwd: &Path) -> PathBuf {
    cwd.join(".fuel")
}

/// Load and validate `.fuel/config.toml`, following the resolution chain
/// documented on [`ConfigFile::load`]: explicit path > `FUEL_CONFIG` env
/// var > `.fuel/config.toml` under `cwd`.
pub fn load_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<ConfigFile> {
    ConfigFile::load(explicit_path, cwd).with_context(|| "failed to load fuel configuration")
}

/// Write a starter `.fuel/config.toml` plus empty task/epic/run stores.
/// Refuses to overwrite an existing config unless `force` is set.
pub fn init(cwd: &Path, primary_agent: &str, agent_command: &str, port: u16, force: bool) -> Result<PathBuf> {
    let fuel_dir = fuel_dir(cwd);
    std::fs::create_dir_all(&fuel_dir)
        .with_context(|| format!("failed to create {}", fuel_dir.display()))?;

    let config_path = fuel_dir.join("config.toml");
    if config_path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    let starter = format!(
        "primary = \"{primary_agent}\"\nconsume_port = {port}\n\n[agents.{primary_agent}]\ncommand = \"{agent_command}\"\n"
    );
    std::fs::write(&config_path, starter)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    for name in ["tasks.jsonl", "epics.jsonl", "runs.jsonl"] {
        let path = fuel_dir.join(name);
        if !path.exists() {
            std::fs::write(&path, "").with_context(|| format!("failed to create {}", path.display()))?;
        }
    }

    Ok(config_path)
}
