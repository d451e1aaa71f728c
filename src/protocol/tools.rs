// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The static registry of tools advertised over `tools/list`.

use std::str::FromStr;

use super::types::{PropertySchema, Tool, ToolSchema};
use crate::task::{TaskState, DEFAULT_PRIORITY};

/// The tools this server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    ExecuteTask,
    GetTaskStatus,
    CancelTask,
    ListTasks,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        Self::ExecuteTask,
        Self::GetTaskStatus,
        Self::CancelTask,
        Self::ListTasks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecuteTask => "execute_task",
            Self::GetTaskStatus => "get_task_status",
            Self::CancelTask => "cancel_task",
            Self::ListTasks => "list_tasks",
        }
    }

    fn definition(&self) -> Tool {
        let (description, input_schema) = match self {
            Self::ExecuteTask => (
                "Run a coding agent against a project in an isolated worktree. Returns the queued task; poll get_task_status for progress.",
                ToolSchema::new()
                    .with_required(
                        "projectPath",
                        PropertySchema::string("Absolute path of the project to work on"),
                    )
                    .with_property(
                        "command",
                        PropertySchema::string("Command or prompt passed to the agent"),
                    )
                    .with_property(
                        "args",
                        PropertySchema::array_of(
                            PropertySchema::string("Argument"),
                            "Extra arguments passed to the agent",
                        ),
                    )
                    .with_property(
                        "priority",
                        PropertySchema::integer("Task priority, 1 (high) to 3 (low)")
                            .with_range(1, 3)
                            .with_default(DEFAULT_PRIORITY),
                    )
                    .with_property(
                        "timeout",
                        PropertySchema::string("Maximum run time, e.g. 30m or 1h30m")
                            .with_default("30m"),
                    )
                    .with_property(
                        "context",
                        PropertySchema::object("Free-form context handed to the agent"),
                    ),
            ),
            Self::GetTaskStatus => (
                "Get the status, progress and result of a task.",
                ToolSchema::new().with_required("taskId", PropertySchema::string("Task ID")),
            ),
            Self::CancelTask => (
                "Cancel a pending or running task.",
                ToolSchema::new().with_required("taskId", PropertySchema::string("Task ID")),
            ),
            Self::ListTasks => (
                "List known tasks, optionally filtered by status.",
                ToolSchema::new().with_property(
                    "status",
                    PropertySchema::string("Only return tasks with this status")
                        .with_enum(TaskState::ALL.iter().map(|s| s.as_str())),
                ),
            ),
        };

        Tool {
            name: self.name().to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("Unknown tool: {}", s))
    }
}

/// Tool definitions, built once per handler.
pub struct ToolRegistry {
    tools: Vec<(ToolKind, Tool)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: ToolKind::ALL.iter().map(|k| (*k, k.definition())).collect(),
        }
    }

    pub fn list(&self) -> Vec<Tool> {
        self.tools.iter().map(|(_, tool)| tool.clone()).collect()
    }

    /// Resolve a tool by name.
    pub fn get(&self, name: &str) -> Option<(ToolKind, &Tool)> {
        self.resolve(name).ok()
    }

    /// Like [`get`](Self::get), with the message reported to callers for an unknown name.
    pub fn resolve(&self, name: &str) -> Result<(ToolKind, &Tool), String> {
        let kind: ToolKind = name.parse()?;
        self.tools
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(kind, tool)| (*kind, tool))
            .ok_or_else(|| format!("Unknown tool: {}", name))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
