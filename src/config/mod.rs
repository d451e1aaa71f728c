// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for dispatch.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.dispatch/config.yaml
//! - Workspace config: .dispatch.yaml, .dispatch.yml, .dispatch.json or dispatch.config.json
//!   (or an explicit `--config` file instead)
//! - Environment: `DISPATCH_*` variables
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > env > workspace > global > defaults) and
//! validated once. Components receive their section by value; there is no global config.

pub mod duration;
mod loader;
mod merger;
mod types;

pub use duration::{format_duration, parse_duration};

pub use loader::{
    get_global_config_dir, get_global_config_path, init_config, load_config_file,
    load_global_config, load_workspace_config, save_config_file, CONFIG_FILES,
    GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};

pub use merger::{default_config, env_overrides, merge_config, CliOptions, ENV_PREFIX};

pub use types::{
    AuthConfig, AuthFile, ConfigFile, ExecutorConfig, ExecutorFile, MonitoringConfig,
    MonitoringFile, ResolvedConfig, ServerConfig, ServerFile, TaskConfig, TasksFile,
    WorktreeConfig, WorktreesFile, LOG_FORMATS, LOG_LEVELS,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate every configuration source.
///
/// When `explicit` is given it replaces the workspace file search and must exist.
pub fn load_config(
    workspace_root: &Path,
    explicit: Option<&Path>,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = match explicit {
        Some(path) => Some(load_config_file(path)?),
        None => load_workspace_config(workspace_root)?,
    };
    let env = env_overrides(std::env::vars())?;

    let config = merge_config(global, workspace, env, cli_options);
    config.validate()?;
    Ok(config)
}
