// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{ConfigFile, ResolvedConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".dispatch.yaml",
    ".dispatch.yml",
    ".dispatch.json",
    "dispatch.config.json",
];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".dispatch";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.yaml";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.dispatch/config.yaml.
pub fn load_global_config() -> Result<Option<ConfigFile>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load configuration from the working directory.
///
/// The first file in [`CONFIG_FILES`] that exists wins.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref(),
        Some("yaml") | Some("yml")
    )
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    if is_yaml(path) {
        serde_yaml::from_str(&content).map_err(ConfigError::from)
    } else {
        serde_json::from_str(&content).map_err(ConfigError::from)
    }
}

/// Write a configuration file, picking the format from the extension.
pub fn save_config_file(path: &Path, config: &ConfigFile) -> Result<(), ConfigError> {
    let content = if is_yaml(path) {
        serde_yaml::to_string(config)?
    } else {
        serde_json::to_string_pretty(config)?
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Write a starter config file with every default spelled out.
///
/// Refuses to overwrite an existing file.
pub fn init_config(workspace_root: &Path, filename: Option<&str>) -> Result<PathBuf, ConfigError> {
    let path = workspace_root.join(filename.unwrap_or(CONFIG_FILES[0]));
    if path.exists() {
        return Err(ConfigError::InvalidFormat(format!(
            "{} already exists",
            path.display()
        )));
    }

    let config = ConfigFile::from(&ResolvedConfig::default());
    save_config_file(&path, &config)?;
    Ok(path)
}
