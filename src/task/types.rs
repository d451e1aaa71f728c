// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task records and the task state machine.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::config::duration::serde_duration;

/// The only task type workers know how to run.
pub const CODING_AGENT: &str = "coding_agent";

/// Priority used when a request does not specify one.
pub const DEFAULT_PRIORITY: i32 = 2;

/// Status of a task.
///
/// ```text
/// pending ──▶ running ──▶ completed | failed | cancelled | timeout
///    │
///    └──────▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::Timeout,
    ];

    /// Terminal states are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

fn default_task_type() -> String {
    CODING_AGENT.to_string()
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// A request to run a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Assigned by the manager when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,

    pub project_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Zero or absent means the configured default.
    #[serde(
        default,
        with = "serde_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl TaskRequest {
    /// A coding-agent request for `project_path` with default settings.
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            task_type: default_task_type(),
            project_path: project_path.into(),
            command: None,
            args: Vec::new(),
            context: Map::new(),
            priority: DEFAULT_PRIORITY,
            timeout: None,
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }
}

/// How a running task ended.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Completed(Value),
    Failed(String),
    Cancelled(&'static str),
    TimedOut(Duration),
}

impl Outcome {
    pub(crate) fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled(_) => TaskState::Cancelled,
            Self::TimedOut(_) => TaskState::Timeout,
        }
    }
}

/// A tracked task. The manager owns the canonical copy; everyone else gets clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub project_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
    pub priority: i32,
    #[serde(with = "serde_duration")]
    pub timeout: Duration,

    pub status: TaskState,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Task {
    /// Build a pending task, filling in the ID and timeout.
    pub(crate) fn from_request(request: TaskRequest, default_timeout: Duration) -> Self {
        let id = request
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("task_{}", Uuid::new_v4().simple()));
        let timeout = request
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(default_timeout);

        Self {
            id,
            task_type: request.task_type,
            project_path: request.project_path,
            command: request.command,
            args: request.args,
            context: request.context,
            priority: request.priority,
            timeout,
            status: TaskState::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            result: None,
            error: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            worktree_id: None,
            metadata: request.metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time between start and end, when both are known.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_time?;
        let end = self.end_time?;
        (end - start).to_std().ok()
    }

    /// `pending → running`. Returns false if the task is not pending.
    pub(crate) fn mark_running(&mut self) -> bool {
        if self.status != TaskState::Pending {
            return false;
        }
        self.status = TaskState::Running;
        self.start_time = Some(Utc::now());
        self.progress = 0.1;
        self.message = "Task started".to_string();
        true
    }

    /// Move progress forward while running. Progress never goes backwards.
    pub(crate) fn advance(&mut self, progress: f64, message: impl Into<String>) {
        if self.status != TaskState::Running {
            return;
        }
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        self.message = message.into();
    }

    /// Move to a terminal state. Returns false, changing nothing, if already terminal.
    pub(crate) fn finish(&mut self, outcome: Outcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = outcome.state();
        self.end_time = Some(Utc::now());
        match outcome {
            Outcome::Completed(result) => {
                self.progress = 1.0;
                self.message = "Task completed".to_string();
                self.result = Some(result);
            }
            Outcome::Failed(error) => {
                self.message = "Task failed".to_string();
                self.error = Some(error);
            }
            Outcome::Cancelled(reason) => {
                self.message = format!("Task cancelled: {}", reason);
            }
            Outcome::TimedOut(limit) => {
                self.message = "Task timed out".to_string();
                self.error = Some(format!(
                    "exceeded timeout of {}",
                    crate::config::format_duration(limit)
                ));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Task {
        Task::from_request(TaskRequest::new("/tmp/project"), Duration::from_secs(60))
    }

    #[test]
    fn test_state_parsing_and_terminality() {
        for state in TaskState::ALL {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("paused".parse::<TaskState>().is_err());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Timeout.is_terminal());
    }

    #[test]
    fn test_from_request_defaults() {
        let task = pending();
        assert!(task.id.starts_with("task_"));
        assert_eq!(task.status, TaskState::Pending);
        assert_eq!(task.timeout, Duration::from_secs(60));
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.end_time.is_none());

        let zero = Task::from_request(
            TaskRequest::new("/p").with_timeout(Duration::ZERO).with_id("  "),
            Duration::from_secs(5),
        );
        assert_eq!(zero.timeout, Duration::from_secs(5));
        assert!(zero.id.starts_with("task_"));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut task = pending();
        task.advance(0.5, "ignored while pending");
        assert_eq!(task.progress, 0.0);

        assert!(task.mark_running());
        task.advance(0.6, "workspace ready");
        task.advance(0.4, "stale update");
        assert_eq!(task.progress, 0.6);
        assert_eq!(task.message, "stale update");
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = pending();
        assert!(task.finish(Outcome::Cancelled("by request")));
        assert_eq!(task.status, TaskState::Cancelled);
        assert!(task.end_time.is_some());
        assert!(task.start_time.is_none());

        assert!(!task.finish(Outcome::Completed(Value::Null)));
        assert_eq!(task.status, TaskState::Cancelled);
        assert!(!task.mark_running());
    }

    #[test]
    fn test_request_deserialization() {
        let request: TaskRequest = serde_json::from_str(
            r#"{"projectPath": "/repo", "args": ["fix", "tests"], "timeout": "10m"}"#,
        )
        .unwrap();
        assert_eq!(request.task_type, CODING_AGENT);
        assert_eq!(request.priority, DEFAULT_PRIORITY);
        assert_eq!(request.timeout, Some(Duration::from_secs(600)));
        assert_eq!(request.args.len(), 2);
    }

    #[test]
    fn test_task_serialization() {
        let mut task = pending();
        task.mark_running();
        task.finish(Outcome::TimedOut(Duration::from_secs(60)));

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "timeout");
        assert_eq!(json["timeout"], "1m");
        assert_eq!(json["type"], CODING_AGENT);
        assert!(json["endTime"].is_string());
        assert_eq!(json["error"], "exceeded timeout of 1m");
    }
}
