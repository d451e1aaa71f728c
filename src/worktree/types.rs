// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worktree records.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a pooled workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStatus {
    /// Referenced by a running task. Never evicted.
    Active,
    /// No task references it; eligible for TTL eviction.
    Idle,
    /// Storage is being removed. Never handed out.
    Cleanup,
}

impl WorktreeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for WorktreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the workspace was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationKind {
    /// `git worktree add` on a new branch.
    GitWorktree,
    /// Full directory copy of a project without version control.
    Copy,
    /// Found on disk at startup.
    Recovered,
}

/// One entry in the pool. Always handed out by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    pub id: String,
    /// Project the workspace was created from. Unknown for some recovered entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    /// Absolute directory the executor runs in.
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub kind: IsolationKind,
    pub status: WorktreeStatus,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl WorktreeInfo {
    pub(crate) fn reserve(id: String, project_path: PathBuf, path: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_path: Some(project_path),
            path,
            branch: None,
            kind: IsolationKind::Copy,
            status: WorktreeStatus::Active,
            created_at: now,
            last_used: now,
        }
    }

    /// Mark as accessed now.
    pub fn touch(&mut self) {
        self.last_used = Utc::now();
    }

    /// Idle for longer than `ttl` as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        if self.status != WorktreeStatus::Idle {
            return false;
        }
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.last_used > ttl,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_only_idle_entries_expire() {
        let mut info = WorktreeInfo::reserve("wt_1".into(), "/p".into(), "/w/wt_1".into());
        let later = Utc::now() + chrono::Duration::hours(3);
        assert!(!info.is_expired(later, Duration::from_secs(3600)));

        info.status = WorktreeStatus::Idle;
        assert!(info.is_expired(later, Duration::from_secs(3600)));
        assert!(!info.is_expired(Utc::now(), Duration::from_secs(3600)));

        info.status = WorktreeStatus::Cleanup;
        assert!(!info.is_expired(later, Duration::from_secs(3600)));
    }

    #[test]
    fn test_serialization() {
        let info = WorktreeInfo::reserve("wt_1".into(), "/p".into(), "/w/wt_1".into());
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["projectPath"], "/p");
        assert!(json.get("branch").is_none());
    }
}
