// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP channel: `POST /mcp` for JSON-RPC plus a small REST and monitoring surface.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::auth::AuthLayer;
use super::error::TransportError;
use crate::config::MonitoringConfig;
use crate::error::{TaskError, WorktreeError};
use crate::protocol::{JsonRpcResponse, ProtocolHandler};
use crate::task::{Task, TaskManager, TaskRequest, TaskState};
use crate::telemetry::Metrics;
use crate::worktree::{WorktreeInfo, WorktreeManager, WorktreeStatus};

// ---------------------------------------------------------------------------
// State and errors
// ---------------------------------------------------------------------------

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ProtocolHandler>,
    pub tasks: Arc<dyn TaskManager>,
    pub worktrees: Arc<dyn WorktreeManager>,
    pub metrics: Arc<Metrics>,
}

/// JSON error body `{error, timestamp}` with a status derived from the error kind.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_kind(kind: crate::error::ErrorKind, message: String) -> Self {
        let status =
            StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, message)
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}

impl From<WorktreeError> for ApiError {
    fn from(err: WorktreeError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.message, "timestamp": Utc::now() });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the application router. `auth` guards every route except the health path.
pub fn router(state: AppState, monitoring: &MonitoringConfig, auth: Option<AuthLayer>) -> Router {
    let mut app = Router::new()
        .route("/mcp", post(mcp))
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).delete(cancel_task))
        .route("/worktrees", get(list_worktrees))
        .route("/worktrees/{id}", get(get_worktree).delete(delete_worktree));

    if monitoring.enabled {
        app = app
            .route(&monitoring.health_path, get(health))
            .route(&monitoring.metrics_path, get(metrics));
    }

    let mut app = app.with_state(state);
    if let Some(auth) = auth {
        app = app.layer(auth.bypass(monitoring.health_path.clone()));
    }
    if monitoring.log_requests {
        app = app.layer(TraceLayer::new_for_http());
    }
    app.layer(CorsLayer::permissive())
}

async fn mcp(State(state): State<AppState>, body: String) -> Json<JsonRpcResponse> {
    let caller = CancellationToken::new();
    // Cancels the submission if the client goes away mid-request.
    let _guard = caller.clone().drop_guard();
    Json(state.handler.handle_message(&body, &caller).await)
}

#[derive(Debug, Deserialize)]
struct TaskFilter {
    status: Option<TaskState>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Json<Value> {
    let tasks: Vec<Task> = state
        .tasks
        .list_tasks()
        .await
        .into_iter()
        .filter(|t| filter.status.map_or(true, |s| t.status == s))
        .collect();
    Json(json!({ "count": tasks.len(), "tasks": tasks }))
}

async fn create_task(
    State(state): State<AppState>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let Json(request) = payload?;
    let caller = CancellationToken::new();
    let _guard = caller.clone().drop_guard();
    let task = state.tasks.submit_task(request, &caller).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get_task_status(&id).await?))
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.tasks.cancel_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_worktrees(State(state): State<AppState>) -> Json<Value> {
    let worktrees = state.worktrees.list_worktrees().await;
    Json(json!({ "count": worktrees.len(), "worktrees": worktrees }))
}

async fn get_worktree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorktreeInfo>> {
    Ok(Json(state.worktrees.get_worktree(&id).await?))
}

async fn delete_worktree(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.worktrees.delete_worktree(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.handler.health_check().await {
        Ok(()) => Json(json!({ "status": "healthy", "timestamp": Utc::now() })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "timestamp": Utc::now(),
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    let tasks = state.tasks.list_tasks().await;
    let mut task_counts: BTreeMap<&'static str, usize> =
        TaskState::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for task in &tasks {
        *task_counts.entry(task.status.as_str()).or_default() += 1;
    }

    let worktrees = state.worktrees.list_worktrees().await;
    let mut worktree_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for status in [WorktreeStatus::Active, WorktreeStatus::Idle, WorktreeStatus::Cleanup] {
        worktree_counts.insert(status.as_str(), 0);
    }
    for worktree in &worktrees {
        *worktree_counts.entry(worktree.status.as_str()).or_default() += 1;
    }

    Json(json!({
        "tasks": { "total": tasks.len(), "byStatus": task_counts },
        "worktrees": { "total": worktrees.len(), "byStatus": worktree_counts },
        "counters": state.metrics.snapshot(),
        "timestamp": Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

struct Running {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

/// Serves a router on a TCP address until stopped.
pub struct HttpTransport {
    addr: String,
    router: Router,
    running: Mutex<Option<Running>>,
}

impl HttpTransport {
    pub fn new(addr: impl Into<String>, router: Router) -> Self {
        Self {
            addr: addr.into(),
            router,
            running: Mutex::new(None),
        }
    }

    /// The bound address while running. Useful when configured with port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning("http"));
        }

        let listener = TcpListener::bind(&self.addr)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: self.addr.clone(),
                message: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let serve = axum::serve(
            listener,
            self.router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
        let handle = tokio::spawn(async move { serve.await });

        info!(addr = %local_addr, "HTTP transport listening");
        *running = Some(Running {
            local_addr,
            shutdown,
            handle,
        });
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.shutdown.cancel();
        match running.handle.await {
            Ok(Ok(())) => {
                info!("HTTP transport stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(error = %e, "HTTP server failed");
                Err(TransportError::TaskFailed {
                    channel: "http",
                    message: e.to_string(),
                })
            }
            Err(e) => Err(TransportError::TaskFailed {
                channel: "http",
                message: e.to_string(),
            }),
        }
    }
}
