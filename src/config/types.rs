// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`ConfigFile`] is the partial, on-disk shape (every field optional, JSON or YAML).
//! [`ResolvedConfig`] is what the server runs with after defaults and overrides are merged.
//! Each component receives its own section by value.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration::serde_duration;
use crate::error::ConfigError;

/// Log levels accepted by `logLevel`.
pub const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Log layouts accepted by `logFormat`: one line per event, multi-line with spans and source
/// locations, or uncolored lines for log collectors.
pub const LOG_FORMATS: &[&str] = &["compact", "full", "plain"];

/// Configuration file contents. Missing fields fall through to lower-precedence sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktrees: Option<WorktreesFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthFile>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdio: Option<bool>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub shutdown_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<usize>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_timeout: Option<Duration>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub retention: Option<Duration>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub reap_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreesFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_worktrees: Option<usize>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub idle_ttl: Option<Duration>,
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub cleanup_interval: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_ips: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_proxy_headers: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_requests: Option<bool>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub log_level: String,
    pub log_format: String,
    pub server: ServerConfig,
    pub tasks: TaskConfig,
    pub worktrees: WorktreeConfig,
    pub executor: ExecutorConfig,
    pub auth: AuthConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            server: ServerConfig::default(),
            tasks: TaskConfig::default(),
            worktrees: WorktreeConfig::default(),
            executor: ExecutorConfig::default(),
            auth: AuthConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ResolvedConfig {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logLevel",
                format!("expected one of {}", LOG_LEVELS.join(", ")),
            ));
        }
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ConfigError::invalid(
                "logFormat",
                format!("expected one of {}", LOG_FORMATS.join(", ")),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::invalid("server.port", "must be between 1 and 65535"));
        }
        if self.tasks.workers == 0 {
            return Err(ConfigError::invalid("tasks.workers", "must be at least 1"));
        }
        if self.tasks.queue_size == 0 {
            return Err(ConfigError::invalid("tasks.queueSize", "must be at least 1"));
        }
        if self.tasks.default_timeout.is_zero() {
            return Err(ConfigError::invalid("tasks.defaultTimeout", "must be positive"));
        }
        if self.worktrees.max_worktrees == 0 {
            return Err(ConfigError::invalid("worktrees.maxWorktrees", "must be at least 1"));
        }
        if self.executor.program.trim().is_empty() {
            return Err(ConfigError::invalid("executor.program", "must not be empty"));
        }
        for (field, path) in [
            ("monitoring.healthPath", &self.monitoring.health_path),
            ("monitoring.metricsPath", &self.monitoring.metrics_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid(field, "must start with '/'"));
            }
        }
        Ok(())
    }
}

/// Listener and channel selection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub http: bool,
    pub stdio: bool,
    #[serde(with = "serde_duration")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            http: true,
            stdio: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Worker pool and queue sizing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub workers: usize,
    pub queue_size: usize,
    #[serde(with = "serde_duration")]
    pub default_timeout: Duration,
    /// How long finished tasks stay queryable.
    #[serde(with = "serde_duration")]
    pub retention: Duration,
    #[serde(with = "serde_duration")]
    pub reap_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_size: 100,
            default_timeout: Duration::from_secs(30 * 60),
            retention: Duration::from_secs(24 * 60 * 60),
            reap_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Workspace pool settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeConfig {
    pub base_dir: PathBuf,
    pub max_worktrees: usize,
    #[serde(with = "serde_duration")]
    pub idle_ttl: Duration,
    /// Zero disables the periodic sweep.
    #[serde(with = "serde_duration")]
    pub cleanup_interval: Duration,
    pub branch_prefix: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./worktrees"),
            max_worktrees: 10,
            idle_ttl: Duration::from_secs(2 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            branch_prefix: "dispatch/".to_string(),
        }
    }
}

/// The program launched for each task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    pub program: String,
    pub default_args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            default_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    /// Inline tokens. Never printed by `config show`.
    #[serde(skip_serializing)]
    pub tokens: Vec<String>,
    pub allowed_ips: Vec<String>,
    /// Resolve the client from `X-Forwarded-For` / `X-Real-IP`. Only safe behind a proxy that
    /// overwrites them.
    pub trust_proxy_headers: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_file: None,
            tokens: Vec::new(),
            allowed_ips: vec!["127.0.0.1".to_string(), "::1".to_string()],
            trust_proxy_headers: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub health_path: String,
    pub metrics_path: String,
    pub log_requests: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_path: "/health".to_string(),
            metrics_path: "/metrics".to_string(),
            log_requests: true,
        }
    }
}

impl From<&ResolvedConfig> for ConfigFile {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            log_level: Some(config.log_level.clone()),
            log_format: Some(config.log_format.clone()),
            server: Some(ServerFile {
                host: Some(config.server.host.clone()),
                port: Some(config.server.port),
                http: Some(config.server.http),
                stdio: Some(config.server.stdio),
                shutdown_timeout: Some(config.server.shutdown_timeout),
            }),
            tasks: Some(TasksFile {
                workers: Some(config.tasks.workers),
                queue_size: Some(config.tasks.queue_size),
                default_timeout: Some(config.tasks.default_timeout),
                retention: Some(config.tasks.retention),
                reap_interval: Some(config.tasks.reap_interval),
            }),
            worktrees: Some(WorktreesFile {
                base_dir: Some(config.worktrees.base_dir.clone()),
                max_worktrees: Some(config.worktrees.max_worktrees),
                idle_ttl: Some(config.worktrees.idle_ttl),
                cleanup_interval: Some(config.worktrees.cleanup_interval),
                branch_prefix: Some(config.worktrees.branch_prefix.clone()),
            }),
            executor: Some(ExecutorFile {
                program: Some(config.executor.program.clone()),
                default_args: Some(config.executor.default_args.clone()),
            }),
            auth: Some(AuthFile {
                enabled: Some(config.auth.enabled),
                token_file: config.auth.token_file.clone(),
                tokens: None,
                allowed_ips: Some(config.auth.allowed_ips.clone()),
                trust_proxy_headers: Some(config.auth.trust_proxy_headers),
            }),
            monitoring: Some(MonitoringFile {
                enabled: Some(config.monitoring.enabled),
                health_path: Some(config.monitoring.health_path.clone()),
                metrics_path: Some(config.monitoring.metrics_path.clone()),
                log_requests: Some(config.monitoring.log_requests),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ResolvedConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.address(), "localhost:8080");
        assert_eq!(config.tasks.default_timeout, Duration::from_secs(1800));
        assert_eq!(config.worktrees.max_worktrees, 10);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ResolvedConfig::default();
        config.tasks.workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "tasks.workers"
        ));

        let mut config = ResolvedConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = ResolvedConfig::default();
        config.log_format = "json".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "logFormat"
        ));

        let mut config = ResolvedConfig::default();
        config.monitoring.health_path = "health".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml_file() {
        let yaml = r#"
logLevel: debug
server:
  port: 9090
  stdio: true
tasks:
  workers: 2
  defaultTimeout: 10m
worktrees:
  idleTtl: 90
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.log_level.as_deref(), Some("debug"));
        let server = file.server.unwrap();
        assert_eq!(server.port, Some(9090));
        assert_eq!(server.stdio, Some(true));
        assert!(server.host.is_none());
        let tasks = file.tasks.unwrap();
        assert_eq!(tasks.default_timeout, Some(Duration::from_secs(600)));
        assert_eq!(file.worktrees.unwrap().idle_ttl, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_resolved_serialization_hides_tokens() {
        let mut config = ResolvedConfig::default();
        config.auth.tokens = vec!["secret".to_string()];
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"defaultTimeout\":\"30m\""));
    }
}
