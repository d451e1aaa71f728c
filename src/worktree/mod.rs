// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Isolated workspaces for task execution.
//!
//! Every task runs in its own workspace so agents never touch the caller's checkout. The pool
//! bounds how many exist at once, evicts idle ones after a TTL, and rediscovers leftovers on
//! startup.

mod copy;
pub mod git;
mod pool;
mod types;

pub use copy::copy_project;
pub use pool::{WorktreePool, WORKTREE_PREFIX};
pub use types::{IsolationKind, WorktreeInfo, WorktreeStatus};

use std::path::Path;

use async_trait::async_trait;

use crate::error::WorktreeError;

/// Capability contract for a workspace pool.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    /// Allocate a new workspace for `project_path`, status `active`.
    async fn create_worktree(&self, project_path: &Path) -> Result<WorktreeInfo, WorktreeError>;

    /// Remove a workspace and its storage.
    async fn delete_worktree(&self, id: &str) -> Result<(), WorktreeError>;

    /// Look up a workspace, refreshing its last-used time.
    async fn get_worktree(&self, id: &str) -> Result<WorktreeInfo, WorktreeError>;

    async fn list_worktrees(&self) -> Vec<WorktreeInfo>;

    /// Mark a workspace idle once no task references it.
    async fn release_worktree(&self, id: &str) -> Result<(), WorktreeError>;

    /// Evict idle workspaces past the TTL. Returns how many were removed.
    async fn cleanup_worktrees(&self) -> usize;

    async fn health_check(&self) -> Result<(), WorktreeError>;

    /// Prepare storage, recover existing workspaces and start the periodic sweeper.
    async fn start(&self) -> Result<(), WorktreeError>;

    async fn stop(&self);
}
