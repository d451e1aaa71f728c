// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use crate::error::ConfigError;

use super::types::{
    ConfigFile, ExecutorFile, ResolvedConfig, ServerFile, TasksFile, WorktreesFile,
};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DISPATCH_";

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub http: Option<bool>,
    pub stdio: Option<bool>,
    pub workers: Option<usize>,
    pub worktree_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Environment (`DISPATCH_*`)
/// 3. Workspace or explicit config file
/// 4. Global config (~/.dispatch/config.yaml)
/// 5. Default values
pub fn merge_config(
    global: Option<ConfigFile>,
    workspace: Option<ConfigFile>,
    env: Option<ConfigFile>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for layer in [global, workspace, env].into_iter().flatten() {
        apply_config_file(&mut result, &layer);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_config_file(result: &mut ResolvedConfig, config: &ConfigFile) {
    if let Some(ref level) = config.log_level {
        result.log_level = level.clone();
    }
    if let Some(ref format) = config.log_format {
        result.log_format = format.clone();
    }

    if let Some(ref server) = config.server {
        let target = &mut result.server;
        if let Some(ref host) = server.host {
            target.host = host.clone();
        }
        if let Some(port) = server.port {
            target.port = port;
        }
        if let Some(http) = server.http {
            target.http = http;
        }
        if let Some(stdio) = server.stdio {
            target.stdio = stdio;
        }
        if let Some(timeout) = server.shutdown_timeout {
            target.shutdown_timeout = timeout;
        }
    }

    if let Some(ref tasks) = config.tasks {
        let target = &mut result.tasks;
        if let Some(workers) = tasks.workers {
            target.workers = workers;
        }
        if let Some(size) = tasks.queue_size {
            target.queue_size = size;
        }
        if let Some(timeout) = tasks.default_timeout {
            target.default_timeout = timeout;
        }
        if let Some(retention) = tasks.retention {
            target.retention = retention;
        }
        if let Some(interval) = tasks.reap_interval {
            target.reap_interval = interval;
        }
    }

    if let Some(ref worktrees) = config.worktrees {
        let target = &mut result.worktrees;
        if let Some(ref dir) = worktrees.base_dir {
            target.base_dir = dir.clone();
        }
        if let Some(max) = worktrees.max_worktrees {
            target.max_worktrees = max;
        }
        if let Some(ttl) = worktrees.idle_ttl {
            target.idle_ttl = ttl;
        }
        if let Some(interval) = worktrees.cleanup_interval {
            target.cleanup_interval = interval;
        }
        if let Some(ref prefix) = worktrees.branch_prefix {
            target.branch_prefix = prefix.clone();
        }
    }

    if let Some(ref executor) = config.executor {
        if let Some(ref program) = executor.program {
            result.executor.program = program.clone();
        }
        if let Some(ref args) = executor.default_args {
            result.executor.default_args = args.clone();
        }
    }

    if let Some(ref auth) = config.auth {
        if let Some(enabled) = auth.enabled {
            result.auth.enabled = enabled;
        }
        if auth.token_file.is_some() {
            result.auth.token_file = auth.token_file.clone();
        }
        if let Some(ref tokens) = auth.tokens {
            for token in tokens {
                if !result.auth.tokens.contains(token) {
                    result.auth.tokens.push(token.clone());
                }
            }
        }
        // An explicit list replaces the loopback default rather than extending it.
        if let Some(ref ips) = auth.allowed_ips {
            result.auth.allowed_ips = ips.clone();
        }
        if let Some(trust) = auth.trust_proxy_headers {
            result.auth.trust_proxy_headers = trust;
        }
    }

    if let Some(ref monitoring) = config.monitoring {
        let target = &mut result.monitoring;
        if let Some(enabled) = monitoring.enabled {
            target.enabled = enabled;
        }
        if let Some(ref path) = monitoring.health_path {
            target.health_path = path.clone();
        }
        if let Some(ref path) = monitoring.metrics_path {
            target.metrics_path = path.clone();
        }
        if let Some(log) = monitoring.log_requests {
            target.log_requests = log;
        }
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref host) = cli.host {
        result.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        result.server.port = port;
    }
    if let Some(http) = cli.http {
        result.server.http = http;
    }
    if let Some(stdio) = cli.stdio {
        result.server.stdio = stdio;
    }
    if let Some(workers) = cli.workers {
        result.tasks.workers = workers;
    }
    if let Some(ref dir) = cli.worktree_dir {
        result.worktrees.base_dir = dir.clone();
    }
    if let Some(ref level) = cli.log_level {
        result.log_level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        result.log_format = format.clone();
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, format!("cannot parse '{}'", value)))
}

/// Build a config layer from `DISPATCH_*` variables.
///
/// Returns `None` when no recognised variable is set. Unrecognised `DISPATCH_*` names are ignored.
pub fn env_overrides<I>(vars: I) -> Result<Option<ConfigFile>, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut file = ConfigFile::default();

    for (key, value) in vars {
        let Some(name) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        match name {
            "HOST" => file.server.get_or_insert_with(ServerFile::default).host = Some(value),
            "PORT" => {
                file.server.get_or_insert_with(ServerFile::default).port =
                    Some(parse_env(&key, &value)?)
            }
            "LOG_LEVEL" => file.log_level = Some(value),
            "LOG_FORMAT" => file.log_format = Some(value),
            "WORKERS" => {
                file.tasks.get_or_insert_with(TasksFile::default).workers =
                    Some(parse_env(&key, &value)?)
            }
            "QUEUE_SIZE" => {
                file.tasks.get_or_insert_with(TasksFile::default).queue_size =
                    Some(parse_env(&key, &value)?)
            }
            "WORKTREE_DIR" => {
                file.worktrees.get_or_insert_with(WorktreesFile::default).base_dir =
                    Some(PathBuf::from(value))
            }
            "MAX_WORKTREES" => {
                file.worktrees.get_or_insert_with(WorktreesFile::default).max_worktrees =
                    Some(parse_env(&key, &value)?)
            }
            "EXECUTOR" => {
                file.executor.get_or_insert_with(ExecutorFile::default).program = Some(value)
            }
            _ => {}
        }
    }

    Ok(file_has_values(&file).then_some(file))
}

fn file_has_values(file: &ConfigFile) -> bool {
    file.log_level.is_some()
        || file.log_format.is_some()
        || file.server.is_some()
        || file.tasks.is_some()
        || file.worktrees.is_some()
        || file.executor.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_precedence() {
        let global: ConfigFile =
            serde_yaml::from_str("server:\n  port: 7000\n  host: 0.0.0.0\n").unwrap();
        let workspace: ConfigFile = serde_yaml::from_str("server:\n  port: 7100\n").unwrap();
        let env = env_overrides(vars(&[("DISPATCH_PORT", "7200")])).unwrap();
        let cli = CliOptions {
            workers: Some(2),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), env, cli);
        assert_eq!(config.server.port, 7200);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tasks.workers, 2);
        assert_eq!(config.tasks.queue_size, 100);
    }

    #[test]
    fn test_cli_wins_over_env() {
        let env = env_overrides(vars(&[("DISPATCH_HOST", "example.internal")])).unwrap();
        let cli = CliOptions {
            host: Some("127.0.0.1".to_string()),
            ..Default::default()
        };
        let config = merge_config(None, None, env, cli);
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_log_format_layers() {
        let file: ConfigFile = serde_yaml::from_str("logFormat: plain\n").unwrap();
        let config = merge_config(None, Some(file.clone()), None, CliOptions::default());
        assert_eq!(config.log_format, "plain");

        let env = env_overrides(vars(&[("DISPATCH_LOG_FORMAT", "full")])).unwrap();
        let config = merge_config(None, Some(file), env, CliOptions::default());
        assert_eq!(config.log_format, "full");
    }

    #[test]
    fn test_env_overrides_parse_errors() {
        let err = env_overrides(vars(&[("DISPATCH_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_env_overrides_ignore_unrelated() {
        let result = env_overrides(vars(&[("HOME", "/root"), ("DISPATCH_UNKNOWN", "1")])).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_allowed_ips_replace_default() {
        let file: ConfigFile = serde_yaml::from_str("auth:\n  allowedIps: ['10.0.0.0/8']\n").unwrap();
        let config = merge_config(None, Some(file), None, CliOptions::default());
        assert_eq!(config.auth.allowed_ips, vec!["10.0.0.0/8".to_string()]);
        assert!(!config.auth.trust_proxy_headers);

        let file: ConfigFile =
            serde_yaml::from_str("auth:\n  trustProxyHeaders: true\n").unwrap();
        let config = merge_config(None, Some(file), None, CliOptions::default());
        assert!(config.auth.trust_proxy_headers);
    }

    #[test]
    fn test_durations_merge() {
        let file: ConfigFile =
            serde_yaml::from_str("worktrees:\n  idleTtl: 30m\n  cleanupInterval: 0\n").unwrap();
        let config = merge_config(None, Some(file), None, CliOptions::default());
        assert_eq!(config.worktrees.idle_ttl, Duration::from_secs(1800));
        assert!(config.worktrees.cleanup_interval.is_zero());
    }
}
