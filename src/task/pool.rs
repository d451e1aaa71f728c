// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-size worker pool consuming a bounded queue.
//!
//! Submissions are registered as pending and pushed onto a `flume` channel with `try_send`, so a
//! full queue is reported to the caller immediately. Each worker pulls one task ID at a time and
//! runs it in a separate tokio task; a panic there surfaces as a `JoinError` and marks the task
//! failed without taking the worker down.
//!
//! Every running task gets a child of the pool's shutdown token. Cancelling a task, hitting its
//! deadline, or stopping the pool all cancel that token; execution stages check it between steps
//! and the executor kills its process when it fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{Invocation, ProcessExecutor};
use super::types::{Outcome, Task, TaskRequest, TaskState, CODING_AGENT};
use super::TaskManager;
use crate::config::TaskConfig;
use crate::error::TaskError;
use crate::telemetry::Metrics;
use crate::worktree::WorktreeManager;

/// How long a cancelled execution gets to unwind before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Default [`TaskManager`] implementation.
pub struct WorkerPool {
    inner: Arc<ManagerInner>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

struct Lifecycle {
    shutdown: CancellationToken,
    handles: JoinSet<()>,
}

struct ManagerInner {
    config: TaskConfig,
    tasks: RwLock<HashMap<String, Task>>,
    /// In-flight executions by task ID. Only locked while the task table lock is held
    /// or briefly on its own, never across an await.
    running: std::sync::Mutex<HashMap<String, Execution>>,
    queue_tx: flume::Sender<String>,
    queue_rx: flume::Receiver<String>,
    alive_workers: AtomicUsize,
    worktrees: Arc<dyn WorktreeManager>,
    executor: Arc<dyn ProcessExecutor>,
    metrics: Arc<Metrics>,
}

/// Handles on one in-flight execution. Whoever removes the entry settles its workspace.
struct Execution {
    token: CancellationToken,
    abort: Option<AbortHandle>,
    worktree_id: Option<String>,
}

impl Execution {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            abort: None,
            worktree_id: None,
        }
    }
}

/// Counts a worker as alive for as long as its future exists.
struct WorkerGuard(Arc<ManagerInner>);

impl WorkerGuard {
    fn new(inner: Arc<ManagerInner>) -> Self {
        inner.alive_workers.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.alive_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(
        config: TaskConfig,
        worktrees: Arc<dyn WorktreeManager>,
        executor: Arc<dyn ProcessExecutor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (queue_tx, queue_rx) = flume::bounded(config.queue_size.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                config,
                tasks: RwLock::new(HashMap::new()),
                running: std::sync::Mutex::new(HashMap::new()),
                queue_tx,
                queue_rx,
                alive_workers: AtomicUsize::new(0),
                worktrees,
                executor,
                metrics,
            }),
            lifecycle: Mutex::new(None),
        }
    }

    /// Number of worker loops currently alive.
    pub fn alive_workers(&self) -> usize {
        self.inner.alive_workers.load(Ordering::SeqCst)
    }

    /// Number of task IDs waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.inner.queue_tx.len()
    }

    /// Delete terminal tasks that ended more than the retention window ago.
    ///
    /// Runs periodically once started; exposed for manual maintenance.
    pub async fn reap_expired(&self) -> usize {
        self.inner.reap_expired().await
    }
}

impl ManagerInner {
    fn executions(&self) -> MutexGuard<'_, HashMap<String, Execution>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_capacity(&self) -> usize {
        self.queue_tx.capacity().unwrap_or(self.config.queue_size)
    }

    async fn forget(&self, id: &str) {
        self.tasks.write().await.remove(id);
    }

    async fn advance(&self, id: &str, progress: f64, message: &str) {
        if let Some(task) = self.tasks.write().await.get_mut(id) {
            task.advance(progress, message);
        }
        debug!(task_id = %id, progress, message, "Task progress");
    }

    /// Record the allocated workspace. A task finalized in the meantime is left untouched.
    async fn attach_worktree(&self, id: &str, worktree_id: &str) {
        let mut tasks = self.tasks.write().await;
        if let Some(execution) = self.executions().get_mut(id) {
            execution.worktree_id = Some(worktree_id.to_string());
        }
        if let Some(task) = tasks.get_mut(id).filter(|t| !t.is_terminal()) {
            task.worktree_id = Some(worktree_id.to_string());
            task.advance(0.6, "Workspace allocated, launching agent");
        }
    }

    async fn reap_expired(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.config.retention) {
            Ok(retention) => Utc::now() - retention,
            Err(_) => return 0,
        };

        let removed = {
            let mut tasks = self.tasks.write().await;
            let before = tasks.len();
            tasks.retain(|_, task| {
                !(task.is_terminal() && task.end_time.map_or(false, |end| end <= cutoff))
            });
            before - tasks.len()
        };

        if removed > 0 {
            self.metrics.record_tasks_reaped(removed as u64);
            info!(removed, "Reaped expired tasks");
        }
        removed
    }

    /// Mark tasks still sitting in the queue as cancelled.
    async fn drain_queue(&self) {
        let queued: Vec<String> = self.queue_rx.drain().collect();
        if queued.is_empty() {
            return;
        }
        let mut tasks = self.tasks.write().await;
        for id in &queued {
            if let Some(task) = tasks.get_mut(id) {
                if task.finish(Outcome::Cancelled("server shutting down")) {
                    self.metrics
                        .record_outcome(TaskState::Cancelled, Duration::ZERO);
                }
            }
        }
        info!(count = queued.len(), "Cancelled queued tasks on shutdown");
    }

    /// The staged body of a task. Runs in its own tokio task.
    async fn execute(&self, task: &Task, token: &CancellationToken) -> Result<Value, TaskError> {
        let ensure_active = || {
            if token.is_cancelled() {
                Err(TaskError::Cancelled)
            } else {
                Ok(())
            }
        };

        if task.task_type != CODING_AGENT {
            return Err(TaskError::UnsupportedType(task.task_type.clone()));
        }
        ensure_active()?;

        match tokio::fs::metadata(&task.project_path).await {
            Ok(m) if m.is_dir() => {}
            _ => {
                return Err(TaskError::InvalidPath(
                    task.project_path.display().to_string(),
                ))
            }
        }
        self.advance(&task.id, 0.2, "Project path validated").await;
        ensure_active()?;

        self.advance(&task.id, 0.4, "Allocating workspace").await;
        let worktree = self.worktrees.create_worktree(&task.project_path).await?;
        self.attach_worktree(&task.id, &worktree.id).await;
        ensure_active()?;

        let invocation = Invocation {
            task_id: task.id.clone(),
            workspace: worktree.path.clone(),
            project_path: task.project_path.clone(),
            command: task.command.clone(),
            args: task.args.clone(),
            context: task.context.clone(),
        };
        let output = self.executor.execute(invocation, token.clone()).await?;
        self.advance(&task.id, 0.9, "Agent finished").await;

        Ok(json!({
            "workspacePath": worktree.path,
            "worktreeId": worktree.id,
            "projectPath": task.project_path,
            "exitCode": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }

    /// Pick up one queued task and drive it to a terminal state.
    async fn run_task(self: &Arc<Self>, id: &str, shutdown: &CancellationToken) {
        let (task, token) = {
            let mut tasks = self.tasks.write().await;
            let Some(task) = tasks.get_mut(id) else {
                debug!(task_id = %id, "Queued task no longer exists");
                return;
            };
            if !task.mark_running() {
                debug!(task_id = %id, status = %task.status, "Skipping task that is no longer pending");
                return;
            }
            let token = shutdown.child_token();
            self.executions()
                .insert(id.to_string(), Execution::new(token.clone()));
            (task.clone(), token)
        };
        info!(task_id = %id, project = %task.project_path.display(), "Task started");
        let started = Instant::now();

        let mut execution = tokio::spawn({
            let inner = Arc::clone(self);
            let task = task.clone();
            let token = token.clone();
            async move { inner.execute(&task, &token).await }
        });
        if let Some(entry) = self.executions().get_mut(id) {
            entry.abort = Some(execution.abort_handle());
        }

        let mut timed_out = false;
        let joined = tokio::select! {
            joined = &mut execution => joined,
            _ = tokio::time::sleep(task.timeout) => {
                timed_out = true;
                token.cancel();
                match tokio::time::timeout(CANCEL_GRACE, &mut execution).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(task_id = %id, "Execution ignored cancellation, aborting");
                        execution.abort();
                        (&mut execution).await
                    }
                }
            }
        };

        let outcome = match joined {
            Ok(Ok(result)) => Outcome::Completed(result),
            Ok(Err(_)) | Err(_) if timed_out => Outcome::TimedOut(task.timeout),
            Ok(Err(_)) if token.is_cancelled() => {
                if shutdown.is_cancelled() {
                    Outcome::Cancelled("server shutting down")
                } else {
                    Outcome::Cancelled("cancelled by request")
                }
            }
            Ok(Err(err)) => Outcome::Failed(err.to_string()),
            Err(err) if err.is_panic() => {
                let message = panic_message(err);
                error!(task_id = %id, panic = %message, "Task execution panicked");
                Outcome::Failed(format!("task panicked: {}", message))
            }
            Err(_) => Outcome::Cancelled("execution aborted"),
        };

        let Some(execution) = self.executions().remove(id) else {
            debug!(task_id = %id, "Execution was abandoned at shutdown");
            return;
        };
        self.settle_worktree(id, execution.worktree_id.as_deref(), &outcome)
            .await;

        let state = outcome.state();
        let detail = match &outcome {
            Outcome::Failed(error) => Some(error.clone()),
            _ => None,
        };
        let finished = match self.tasks.write().await.get_mut(id) {
            Some(task) => task.finish(outcome),
            None => false,
        };

        if !finished {
            debug!(task_id = %id, "Task was already finalized");
            return;
        }
        self.metrics.record_outcome(state, started.elapsed());
        match state {
            TaskState::Completed => info!(task_id = %id, elapsed = ?started.elapsed(), "Task completed"),
            TaskState::Failed => warn!(task_id = %id, error = detail.as_deref().unwrap_or(""), "Task failed"),
            TaskState::Timeout => warn!(task_id = %id, timeout = ?task.timeout, "Task timed out"),
            _ => info!(task_id = %id, status = %state, "Task stopped"),
        }
    }

    /// Completed tasks leave their workspace idle; anything else deletes it.
    async fn settle_worktree(&self, id: &str, worktree_id: Option<&str>, outcome: &Outcome) {
        let Some(worktree_id) = worktree_id else {
            return;
        };

        let result = match outcome {
            Outcome::Completed(_) => self.worktrees.release_worktree(worktree_id).await,
            _ => self.worktrees.delete_worktree(worktree_id).await,
        };
        if let Err(e) = result {
            warn!(task_id = %id, worktree_id = %worktree_id, error = %e, "Failed to settle workspace");
        }
    }
}

impl ManagerInner {
    /// Abort executions that outlived the shutdown timeout and cancel their tasks.
    ///
    /// Called once the worker loops are gone, so nothing else finalizes these tasks.
    async fn abandon_running(&self) {
        let mut abandoned: HashMap<String, Option<String>> = HashMap::new();
        let executions: Vec<(String, Execution)> = self.executions().drain().collect();
        for (id, execution) in executions {
            execution.token.cancel();
            if let Some(abort) = execution.abort {
                abort.abort();
            }
            abandoned.insert(id, execution.worktree_id);
        }

        for task in self.tasks.read().await.values() {
            if task.status == TaskState::Running {
                abandoned
                    .entry(task.id.clone())
                    .or_insert_with(|| task.worktree_id.clone());
            }
        }

        for (id, worktree_id) in abandoned {
            let outcome = Outcome::Cancelled("server shutting down");
            self.settle_worktree(&id, worktree_id.as_deref(), &outcome)
                .await;
            let elapsed = {
                let mut tasks = self.tasks.write().await;
                match tasks.get_mut(&id) {
                    Some(task) if !task.is_terminal() => {
                        task.finish(outcome);
                        task.duration().unwrap_or_default()
                    }
                    _ => continue,
                }
            };
            self.metrics.record_outcome(TaskState::Cancelled, elapsed);
            warn!(task_id = %id, "Aborted task that outlived shutdown");
        }
    }
}

fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(err) => err.to_string(),
    }
}

async fn worker_loop(guard: WorkerGuard, worker: usize, shutdown: CancellationToken) {
    let inner = Arc::clone(&guard.0);
    debug!(worker, "Worker started");
    loop {
        let id = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = inner.queue_rx.recv_async() => match next {
                Ok(id) => id,
                Err(_) => break,
            },
        };
        inner.run_task(&id, &shutdown).await;
    }
    debug!(worker, "Worker stopped");
    drop(guard);
}

async fn reaper_loop(inner: Arc<ManagerInner>, shutdown: CancellationToken) {
    let interval = inner.config.reap_interval;
    if interval.is_zero() {
        shutdown.cancelled().await;
        return;
    }
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                inner.reap_expired().await;
            }
        }
    }
}

#[async_trait]
impl TaskManager for WorkerPool {
    async fn submit_task(
        &self,
        request: TaskRequest,
        caller: &CancellationToken,
    ) -> Result<Task, TaskError> {
        let task = Task::from_request(request, self.inner.config.default_timeout);
        let id = task.id.clone();

        {
            let mut tasks = self.inner.tasks.write().await;
            if tasks.contains_key(&id) {
                return Err(TaskError::DuplicateId(id));
            }
            tasks.insert(id.clone(), task.clone());
        }

        if caller.is_cancelled() {
            self.inner.forget(&id).await;
            return Err(TaskError::SubmissionCancelled);
        }

        match self.inner.queue_tx.try_send(id.clone()) {
            Ok(()) => {
                self.inner.metrics.record_submitted();
                info!(
                    task_id = %id,
                    project = %task.project_path.display(),
                    priority = task.priority,
                    "Task submitted"
                );
                Ok(task)
            }
            Err(flume::TrySendError::Full(_)) => {
                self.inner.forget(&id).await;
                self.inner.metrics.record_rejected();
                let capacity = self.inner.queue_capacity();
                warn!(task_id = %id, capacity, "Task queue full, rejecting submission");
                Err(TaskError::QueueFull(capacity))
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                self.inner.forget(&id).await;
                Err(TaskError::NoActiveWorkers)
            }
        }
    }

    async fn get_task_status(&self, id: &str) -> Result<Task, TaskError> {
        self.inner
            .tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    async fn cancel_task(&self, id: &str) -> Result<(), TaskError> {
        let mut tasks = self.inner.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        if task.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: id.to_string(),
                state: task.status,
            });
        }

        let was_running = task.status == TaskState::Running;
        task.finish(Outcome::Cancelled("cancelled by request"));
        self.inner
            .metrics
            .record_outcome(TaskState::Cancelled, task.duration().unwrap_or_default());

        if let Some(execution) = self.inner.executions().get(id) {
            execution.token.cancel();
        }
        info!(task_id = %id, was_running, "Task cancelled");
        Ok(())
    }

    async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.inner.tasks.read().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    async fn health_check(&self) -> Result<(), TaskError> {
        if self.alive_workers() == 0 {
            return Err(TaskError::NoActiveWorkers);
        }
        if self.inner.queue_tx.is_full() {
            return Err(TaskError::QueueFull(self.inner.queue_capacity()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), TaskError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(TaskError::AlreadyStarted);
        }

        let shutdown = CancellationToken::new();
        let mut handles = JoinSet::new();
        for worker in 0..self.inner.config.workers {
            let guard = WorkerGuard::new(Arc::clone(&self.inner));
            handles.spawn(worker_loop(guard, worker, shutdown.clone()));
        }
        handles.spawn(reaper_loop(Arc::clone(&self.inner), shutdown.clone()));

        *lifecycle = Some(Lifecycle { shutdown, handles });
        info!(
            workers = self.inner.config.workers,
            queue_size = self.inner.queue_capacity(),
            "Task manager started"
        );
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> Result<(), TaskError> {
        let Some(mut lifecycle) = self.lifecycle.lock().await.take() else {
            return Ok(());
        };

        lifecycle.shutdown.cancel();
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = lifecycle.handles.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Task worker exited abnormally");
                }
            }
        })
        .await;

        self.inner.drain_queue().await;

        match joined {
            Ok(()) => {
                info!("Task manager stopped");
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, "Task workers did not stop in time");
                lifecycle.handles.abort_all();
                while lifecycle.handles.join_next().await.is_some() {}
                self.inner.abandon_running().await;
                Err(TaskError::ShutdownTimeout(timeout))
            }
        }
    }
}
