// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wires the worktree pool, task manager, protocol handler and transports together.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ResolvedConfig;
use crate::error::{ErrorKind, TaskError, WorktreeError};
use crate::protocol::ProtocolHandler;
use crate::task::{CommandExecutor, ProcessExecutor, TaskManager, WorkerPool};
use crate::telemetry::Metrics;
use crate::transport::{
    router, AppState, AuthLayer, HttpTransport, Multiplexer, StdioTransport, Transport,
    TransportError,
};
use crate::worktree::{WorktreeManager, WorktreePool};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("No transport enabled; enable HTTP or stdio")]
    NoTransports,

    #[error("Shutdown finished with errors: {}", .0.join("; "))]
    Shutdown(Vec<String>),
}

impl ServerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Worktree(e) => e.kind(),
            Self::Task(e) => e.kind(),
            Self::Transport(e) => e.kind(),
            Self::NoTransports => ErrorKind::InvalidInput,
            Self::Shutdown(_) => ErrorKind::Internal,
        }
    }
}

/// The assembled server.
pub struct DispatchServer {
    config: ResolvedConfig,
    metrics: Arc<Metrics>,
    worktrees: Arc<WorktreePool>,
    tasks: Arc<WorkerPool>,
    handler: Arc<ProtocolHandler>,
    transports: Multiplexer,
    stdio_closed: Option<CancellationToken>,
}

impl DispatchServer {
    /// Build a server running tasks with the configured executor program.
    pub fn new(config: ResolvedConfig) -> Result<Self, ServerError> {
        let executor = Arc::new(CommandExecutor::from_config(&config.executor));
        Self::with_executor(config, executor)
    }

    pub fn with_executor(
        config: ResolvedConfig,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self, ServerError> {
        if !config.server.http && !config.server.stdio {
            return Err(ServerError::NoTransports);
        }

        let metrics = Arc::new(Metrics::new());
        let worktrees = Arc::new(WorktreePool::new(
            config.worktrees.clone(),
            Arc::clone(&metrics),
        ));
        let tasks = Arc::new(WorkerPool::new(
            config.tasks.clone(),
            worktrees.clone(),
            executor,
            Arc::clone(&metrics),
        ));
        let handler = Arc::new(ProtocolHandler::new(tasks.clone(), worktrees.clone()));

        let mut transports = Multiplexer::new();
        if config.server.http {
            let auth = if config.auth.enabled {
                Some(AuthLayer::from_config(&config.auth)?)
            } else {
                None
            };
            let state = AppState {
                handler: Arc::clone(&handler),
                tasks: tasks.clone(),
                worktrees: worktrees.clone(),
                metrics: Arc::clone(&metrics),
            };
            let app = router(state, &config.monitoring, auth);
            transports = transports.with(Transport::Http(HttpTransport::new(
                config.server.address(),
                app,
            )));
        }

        let mut stdio_closed = None;
        if config.server.stdio {
            let stdio = StdioTransport::new(Arc::clone(&handler));
            stdio_closed = Some(stdio.closed());
            transports = transports.with(Transport::Stdio(stdio));
        }

        Ok(Self {
            config,
            metrics,
            worktrees,
            tasks,
            handler,
            transports,
            stdio_closed,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn handler(&self) -> Arc<ProtocolHandler> {
        Arc::clone(&self.handler)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Fires when the stdio peer disconnects. `None` when stdio is disabled.
    pub fn stdio_closed(&self) -> Option<CancellationToken> {
        self.stdio_closed.clone()
    }

    /// Bound HTTP address while running.
    pub async fn http_addr(&self) -> Option<SocketAddr> {
        for channel in self.transports.channels() {
            if let Transport::Http(http) = channel {
                return http.local_addr().await;
            }
        }
        None
    }

    /// Start worktrees, then tasks, then transports. A failure stops what already started.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.worktrees.start().await?;

        if let Err(e) = self.tasks.start().await {
            self.worktrees.stop().await;
            return Err(e.into());
        }

        if let Err(e) = self.transports.start().await {
            if let Err(stop_err) = self.tasks.stop(self.config.server.shutdown_timeout).await {
                error!(error = %stop_err, "Failed to stop task manager after startup failure");
            }
            self.worktrees.stop().await;
            return Err(e.into());
        }

        info!(
            http = self.config.server.http,
            stdio = self.config.server.stdio,
            workers = self.config.tasks.workers,
            "Dispatch server started"
        );
        Ok(())
    }

    /// Stop in reverse start order. Every stage runs even if an earlier one failed.
    pub async fn stop(&self) -> Result<(), ServerError> {
        let timeout = self.config.server.shutdown_timeout;
        let mut errors = Vec::new();

        if let Err(e) = self.transports.stop(timeout).await {
            error!(error = %e, "Transport shutdown failed");
            errors.push(e.to_string());
        }
        if let Err(e) = self.tasks.stop(timeout).await {
            error!(error = %e, "Task manager shutdown failed");
            errors.push(e.to_string());
        }
        self.worktrees.stop().await;

        if errors.is_empty() {
            info!("Dispatch server stopped");
            Ok(())
        } else {
            Err(ServerError::Shutdown(errors))
        }
    }
}
