// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the dispatch server.
//!
//! Each subsystem gets a strongly-typed error built with `thiserror`. Every one of them can be
//! classified into an [`ErrorKind`], which is what the HTTP layer and the protocol handler use to
//! pick status codes and decide between soft and hard failures. `anyhow` is only used at the
//! binary edge.

use std::time::Duration;

use thiserror::Error;

use crate::task::executor::ExecutorError;
use crate::task::TaskState;

/// Coarse classification shared by all domain errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad path, unsupported task type, mismatched protocol version.
    InvalidInput,
    /// Unknown task or workspace.
    NotFound,
    /// Operation conflicts with the current state (e.g. cancelling a finished task).
    Conflict,
    /// Queue full or pool exhausted.
    CapacityExceeded,
    /// Executor or git failure.
    ExternalDependency,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// HTTP status code used when this kind surfaces on the REST API.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::CapacityExceeded => 503,
            Self::ExternalDependency | Self::Internal => 500,
        }
    }
}

/// Errors raised by the task manager.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} already finished with status {state}")]
    AlreadyTerminal { id: String, state: TaskState },

    #[error("Task ID already in use: {0}")]
    DuplicateId(String),

    #[error("Task submission cancelled by caller")]
    SubmissionCancelled,

    #[error("Unsupported task type: {0}")]
    UnsupportedType(String),

    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Workspace allocation failed: {0}")]
    Workspace(#[from] WorktreeError),

    #[error("Executor failed: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Task cancelled")]
    Cancelled,

    #[error("No task workers are running")]
    NoActiveWorkers,

    #[error("Task manager is already running")]
    AlreadyStarted,

    #[error("Task workers did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

impl TaskError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QueueFull(_) => ErrorKind::CapacityExceeded,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyTerminal { .. } | Self::DuplicateId(_) | Self::AlreadyStarted => {
                ErrorKind::Conflict
            }
            Self::UnsupportedType(_) | Self::InvalidPath(_) => ErrorKind::InvalidInput,
            Self::Workspace(err) => err.kind(),
            Self::Executor(_) => ErrorKind::ExternalDependency,
            Self::SubmissionCancelled
            | Self::Cancelled
            | Self::NoActiveWorkers
            | Self::ShutdownTimeout(_) => ErrorKind::Internal,
        }
    }
}

/// Errors raised by the worktree pool.
#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("Worktree not found: {0}")]
    NotFound(String),

    #[error("Worktree pool exhausted ({max} in use)")]
    PoolExhausted { max: usize },

    #[error("Project path does not exist or is not a directory: {0}")]
    InvalidProject(String),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Worktree storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorktreeError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PoolExhausted { .. } => ErrorKind::CapacityExceeded,
            Self::InvalidProject(_) => ErrorKind::InvalidInput,
            Self::Git(_) => ErrorKind::ExternalDependency,
            Self::StorageUnavailable(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid-value error for a field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
