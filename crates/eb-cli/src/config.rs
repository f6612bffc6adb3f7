// SPDX-License-Identifier: MIT OR Apache-2.0
//! The installation directory and its configuration file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the installation directory under the user's home.
pub const INSTALLATION_NAME: &str = "earthbuild";

/// Settings persisted in `~/.earthbuild/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationConfig {
    /// Parallelism bound for target conversions.
    pub conversion_parallelism: usize,
    /// Enable auto-skip without the `--auto-skip` flag.
    pub auto_skip: bool,
    /// Comma-separated feature-flag overrides applied to every build file.
    pub feature_flag_overrides: String,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            conversion_parallelism: 10,
            auto_skip: false,
            feature_flag_overrides: String::new(),
        }
    }
}

/// The installation directory (usually `~/.earthbuild`), honoring the
/// `EARTHBUILD_INSTALLATION_DIR` override. Not created by this call.
pub fn installation_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("EARTHBUILD_INSTALLATION_DIR")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(format!(".{INSTALLATION_NAME}"))
}

/// The installation directory, created if missing.
pub fn get_or_create_installation_dir() -> anyhow::Result<PathBuf> {
    let dir = installation_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Load the configuration, falling back to defaults when the file does not
/// exist.
pub fn load_config() -> anyhow::Result<InstallationConfig> {
    let path = installation_dir().join("config.toml");
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstallationConfig::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write the configuration to the installation directory.
pub fn save_config(config: &InstallationConfig) -> anyhow::Result<()> {
    let dir = get_or_create_installation_dir()?;
    let text = toml::to_string_pretty(config)?;
    std::fs::write(dir.join("config.toml"), text)?;
    Ok(())
}

/// Path of the auto-skip database.
pub fn skip_db_path() -> PathBuf {
    installation_dir().join("autoskip.json")
}
