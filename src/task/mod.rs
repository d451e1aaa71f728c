// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task management.
//!
//! A [`TaskManager`] accepts task requests, queues them, runs them on a fixed set of workers and
//! keeps every task's record queryable until it ages out. [`WorkerPool`] is the implementation
//! the server wires up; the trait is the seam the protocol layer and tests code against.

pub mod executor;
mod pool;
mod types;

pub use executor::{CommandExecutor, ProcessExecutor};
pub use pool::WorkerPool;
pub use types::{Task, TaskRequest, TaskState, CODING_AGENT, DEFAULT_PRIORITY};

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Capability contract for a task manager.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Register and enqueue a task. Fails immediately with
    /// [`TaskError::QueueFull`] when the queue has no room; nothing is recorded in that case.
    ///
    /// `caller` is the submitting request's cancellation; if it has fired the submission is
    /// rolled back.
    async fn submit_task(
        &self,
        request: TaskRequest,
        caller: &CancellationToken,
    ) -> Result<Task, TaskError>;

    /// Snapshot of a task's current record.
    async fn get_task_status(&self, id: &str) -> Result<Task, TaskError>;

    /// Cancel a pending or running task.
    async fn cancel_task(&self, id: &str) -> Result<(), TaskError>;

    /// All known tasks, oldest first.
    async fn list_tasks(&self) -> Vec<Task>;

    async fn health_check(&self) -> Result<(), TaskError>;

    async fn start(&self) -> Result<(), TaskError>;

    /// Stop workers, waiting at most `timeout` for running tasks to wind down.
    async fn stop(&self, timeout: Duration) -> Result<(), TaskError>;
}
