// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Bounded pool of isolated workspaces.
//!
//! Each workspace lives in `<base_dir>/wt_<id>`. Git projects get a linked worktree on a fresh
//! branch; anything else is copied in full. The in-memory table is the source of truth while the
//! process runs, and the directories on disk are what survives a restart.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::copy::copy_project;
use super::git;
use super::types::{IsolationKind, WorktreeInfo, WorktreeStatus};
use super::WorktreeManager;
use crate::config::WorktreeConfig;
use crate::error::WorktreeError;
use crate::telemetry::Metrics;

/// Directory name prefix for pooled workspaces.
pub const WORKTREE_PREFIX: &str = "wt_";

/// Git-worktree backed implementation of [`WorktreeManager`].
pub struct WorktreePool {
    inner: Arc<PoolInner>,
    sweeper: Mutex<Option<Sweeper>>,
}

struct Sweeper {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolInner {
    config: WorktreeConfig,
    /// Absolute form of `config.base_dir`.
    base_dir: PathBuf,
    worktrees: RwLock<HashMap<String, WorktreeInfo>>,
    metrics: Arc<Metrics>,
}

impl WorktreePool {
    pub fn new(config: WorktreeConfig, metrics: Arc<Metrics>) -> Self {
        let base_dir =
            std::path::absolute(&config.base_dir).unwrap_or_else(|_| config.base_dir.clone());
        Self {
            inner: Arc::new(PoolInner {
                config,
                base_dir,
                worktrees: RwLock::new(HashMap::new()),
                metrics,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Absolute storage root.
    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }
}

fn new_worktree_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}{}", WORKTREE_PREFIX, &uuid[..12])
}

impl PoolInner {
    /// Reserve a slot for `id`, evicting the least recently used expired entry if full.
    ///
    /// Returns the evicted entry, whose storage the caller must remove.
    async fn reserve(
        &self,
        id: &str,
        project: &Path,
        path: &Path,
    ) -> Result<Option<WorktreeInfo>, WorktreeError> {
        let mut worktrees = self.worktrees.write().await;
        let mut evicted = None;

        if worktrees.len() >= self.config.max_worktrees {
            let now = Utc::now();
            let lru = worktrees
                .values()
                .filter(|w| w.is_expired(now, self.config.idle_ttl))
                .min_by_key(|w| w.last_used)
                .map(|w| w.id.clone());

            match lru.and_then(|lru| worktrees.remove(&lru)) {
                Some(old) => evicted = Some(old),
                None => {
                    return Err(WorktreeError::PoolExhausted {
                        max: self.config.max_worktrees,
                    })
                }
            }
        }

        worktrees.insert(
            id.to_string(),
            WorktreeInfo::reserve(id.to_string(), project.to_path_buf(), path.to_path_buf()),
        );
        Ok(evicted)
    }

    /// Create the workspace directory on disk.
    async fn materialize(
        &self,
        id: &str,
        project: &Path,
        path: &Path,
    ) -> Result<(IsolationKind, Option<String>), WorktreeError> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        if git::is_repository(project) {
            let base = git::base_ref(project).await;
            let branch = format!("{}{}", self.config.branch_prefix, id);
            git::add_worktree(project, path, &branch, &base).await?;
            debug!(worktree_id = %id, %branch, %base, "Created git worktree");
            Ok((IsolationKind::GitWorktree, Some(branch)))
        } else {
            let (src, dest) = (project.to_path_buf(), path.to_path_buf());
            let storage = tokio::fs::canonicalize(&self.base_dir)
                .await
                .unwrap_or_else(|_| self.base_dir.clone());
            let excluded = vec![storage, self.base_dir.clone()];
            let files = tokio::task::spawn_blocking(move || copy_project(&src, &dest, &excluded))
                .await
                .map_err(io::Error::other)??;
            debug!(worktree_id = %id, files, "Copied project without version control");
            Ok((IsolationKind::Copy, None))
        }
    }

    /// Remove a workspace's storage. Never fails; problems are logged.
    async fn remove_storage(&self, info: &WorktreeInfo) {
        let repo = info
            .project_path
            .as_deref()
            .filter(|_| info.kind != IsolationKind::Copy)
            .filter(|p| git::is_repository(p));

        if let Some(repo) = repo {
            if let Err(e) = git::remove_worktree(repo, &info.path).await {
                warn!(
                    worktree_id = %info.id,
                    error = %e,
                    "git worktree remove failed, deleting directory"
                );
            }
        }

        if tokio::fs::try_exists(&info.path).await.unwrap_or(false) {
            if let Err(e) = tokio::fs::remove_dir_all(&info.path).await {
                warn!(worktree_id = %info.id, error = %e, "Failed to delete worktree directory");
            }
        }

        if let Some(repo) = repo {
            if let Err(e) = git::prune(repo).await {
                debug!(error = %e, "git worktree prune failed");
            }
            if let Some(ref branch) = info.branch {
                if let Err(e) = git::delete_branch(repo, branch).await {
                    debug!(%branch, error = %e, "Failed to delete worktree branch");
                }
            }
        }
    }

    /// Evict every idle entry past the TTL, oldest first.
    async fn sweep(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<WorktreeInfo> = {
            let mut worktrees = self.worktrees.write().await;
            let mut ids: Vec<(DateTime<Utc>, String)> = worktrees
                .values()
                .filter(|w| w.is_expired(now, self.config.idle_ttl))
                .map(|w| (w.last_used, w.id.clone()))
                .collect();
            ids.sort();

            ids.into_iter()
                .filter_map(|(_, id)| {
                    let entry = worktrees.get_mut(&id)?;
                    entry.status = WorktreeStatus::Cleanup;
                    Some(entry.clone())
                })
                .collect()
        };

        if expired.is_empty() {
            return 0;
        }

        for info in &expired {
            self.remove_storage(info).await;
        }

        {
            let mut worktrees = self.worktrees.write().await;
            for info in &expired {
                worktrees.remove(&info.id);
            }
        }

        self.metrics.record_worktrees_evicted(expired.len() as u64);
        info!(count = expired.len(), "Evicted idle worktrees");
        expired.len()
    }

    /// Rebuild the inventory from `wt_*` directories under the storage root.
    async fn recover(&self) -> Result<usize, WorktreeError> {
        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        let mut found = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(WORKTREE_PREFIX) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                _ => continue,
            };

            let modified: DateTime<Utc> = metadata
                .modified()
                .unwrap_or_else(|_| SystemTime::now())
                .into();
            let created: DateTime<Utc> = metadata.created().map(Into::into).unwrap_or(modified);
            let path = entry.path();

            found.push(WorktreeInfo {
                id: name,
                project_path: git::linked_repository(&path),
                path,
                branch: None,
                kind: IsolationKind::Recovered,
                status: WorktreeStatus::Idle,
                created_at: created,
                last_used: modified,
            });
        }

        let mut worktrees = self.worktrees.write().await;
        let mut recovered = 0;
        for info in found {
            if !worktrees.contains_key(&info.id) {
                debug!(worktree_id = %info.id, "Recovered worktree");
                worktrees.insert(info.id.clone(), info);
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[async_trait]
impl WorktreeManager for WorktreePool {
    async fn create_worktree(&self, project_path: &Path) -> Result<WorktreeInfo, WorktreeError> {
        let invalid = || WorktreeError::InvalidProject(project_path.display().to_string());
        let project = tokio::fs::canonicalize(project_path)
            .await
            .map_err(|_| invalid())?;
        if !tokio::fs::metadata(&project)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(invalid());
        }

        let id = new_worktree_id();
        let path = self.inner.base_dir.join(&id);

        if let Some(old) = self.inner.reserve(&id, &project, &path).await? {
            info!(worktree_id = %old.id, "Evicting least recently used worktree");
            self.inner.remove_storage(&old).await;
            self.inner.metrics.record_worktrees_evicted(1);
        }

        match self.inner.materialize(&id, &project, &path).await {
            Ok((kind, branch)) => {
                let mut worktrees = self.inner.worktrees.write().await;
                let entry = worktrees
                    .get_mut(&id)
                    .ok_or_else(|| WorktreeError::NotFound(id.clone()))?;
                entry.kind = kind;
                entry.branch = branch;
                entry.touch();
                self.inner.metrics.record_worktree_created();
                info!(
                    worktree_id = %id,
                    project = %project.display(),
                    kind = ?kind,
                    "Worktree created"
                );
                Ok(entry.clone())
            }
            Err(e) => {
                self.inner.worktrees.write().await.remove(&id);
                if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    let _ = tokio::fs::remove_dir_all(&path).await;
                }
                warn!(worktree_id = %id, error = %e, "Worktree creation failed");
                Err(e)
            }
        }
    }

    async fn delete_worktree(&self, id: &str) -> Result<(), WorktreeError> {
        let info = {
            let mut worktrees = self.inner.worktrees.write().await;
            match worktrees.get_mut(id) {
                Some(entry) if entry.status != WorktreeStatus::Cleanup => {
                    entry.status = WorktreeStatus::Cleanup;
                    entry.clone()
                }
                _ => return Err(WorktreeError::NotFound(id.to_string())),
            }
        };

        self.inner.remove_storage(&info).await;
        self.inner.worktrees.write().await.remove(id);
        info!(worktree_id = %id, "Worktree deleted");
        Ok(())
    }

    async fn get_worktree(&self, id: &str) -> Result<WorktreeInfo, WorktreeError> {
        let mut worktrees = self.inner.worktrees.write().await;
        let entry = worktrees
            .get_mut(id)
            .ok_or_else(|| WorktreeError::NotFound(id.to_string()))?;
        entry.touch();
        Ok(entry.clone())
    }

    async fn list_worktrees(&self) -> Vec<WorktreeInfo> {
        let worktrees = self.inner.worktrees.read().await;
        let mut list: Vec<WorktreeInfo> = worktrees.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    async fn release_worktree(&self, id: &str) -> Result<(), WorktreeError> {
        let mut worktrees = self.inner.worktrees.write().await;
        match worktrees.get_mut(id) {
            Some(entry) if entry.status != WorktreeStatus::Cleanup => {
                entry.status = WorktreeStatus::Idle;
                entry.touch();
                debug!(worktree_id = %id, "Worktree released");
                Ok(())
            }
            _ => Err(WorktreeError::NotFound(id.to_string())),
        }
    }

    async fn cleanup_worktrees(&self) -> usize {
        self.inner.sweep().await
    }

    async fn health_check(&self) -> Result<(), WorktreeError> {
        match tokio::fs::metadata(&self.inner.base_dir).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(WorktreeError::StorageUnavailable(format!(
                "{} is not a directory",
                self.inner.base_dir.display()
            ))),
            Err(e) => Err(WorktreeError::StorageUnavailable(format!(
                "{}: {}",
                self.inner.base_dir.display(),
                e
            ))),
        }
    }

    async fn start(&self) -> Result<(), WorktreeError> {
        tokio::fs::create_dir_all(&self.inner.base_dir)
            .await
            .map_err(|e| {
                WorktreeError::StorageUnavailable(format!(
                    "{}: {}",
                    self.inner.base_dir.display(),
                    e
                ))
            })?;

        let recovered = self.inner.recover().await?;
        info!(
            base_dir = %self.inner.base_dir.display(),
            recovered,
            "Worktree pool started"
        );

        let interval = self.inner.config.cleanup_interval;
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() && !interval.is_zero() {
            let shutdown = CancellationToken::new();
            let inner = Arc::clone(&self.inner);
            let token = shutdown.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            inner.sweep().await;
                        }
                    }
                }
                debug!("Worktree sweeper stopped");
            });
            *sweeper = Some(Sweeper { shutdown, handle });
        }
        Ok(())
    }

    async fn stop(&self) {
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            sweeper.shutdown.cancel();
            if let Err(e) = sweeper.handle.await {
                warn!(error = %e, "Worktree sweeper exited abnormally");
            }
        }
        info!("Worktree pool stopped");
    }
}
