// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP surface: JSON-RPC endpoint, REST routes, monitoring and auth.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use dispatch::config::{AuthConfig, MonitoringConfig, TaskConfig, WorktreeConfig};
use dispatch::protocol::ProtocolHandler;
use dispatch::task::executor::{ExecutionOutput, ExecutorError, Invocation, ProcessExecutor};
use dispatch::task::{TaskManager, WorkerPool};
use dispatch::telemetry::Metrics;
use dispatch::transport::{router, AppState, AuthLayer};
use dispatch::worktree::{WorktreeManager, WorktreePool};

struct NoopExecutor;

#[async_trait]
impl ProcessExecutor for NoopExecutor {
    async fn execute(
        &self,
        _invocation: Invocation,
        _cancel: CancellationToken,
    ) -> Result<ExecutionOutput, ExecutorError> {
        Ok(ExecutionOutput::default())
    }
}

struct App {
    base: TempDir,
    tasks: Arc<WorkerPool>,
    worktrees: Arc<WorktreePool>,
    router: Router,
}

impl App {
    fn new(queue_size: usize, auth: Option<AuthConfig>) -> Self {
        let base = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        let worktrees = Arc::new(WorktreePool::new(
            WorktreeConfig {
                base_dir: base.path().join("worktrees"),
                cleanup_interval: Duration::ZERO,
                ..WorktreeConfig::default()
            },
            Arc::clone(&metrics),
        ));
        let tasks = Arc::new(WorkerPool::new(
            TaskConfig {
                workers: 1,
                queue_size,
                ..TaskConfig::default()
            },
            worktrees.clone(),
            Arc::new(NoopExecutor),
            Arc::clone(&metrics),
        ));
        let handler = Arc::new(ProtocolHandler::new(tasks.clone(), worktrees.clone()));
        let state = AppState {
            handler,
            tasks: tasks.clone(),
            worktrees: worktrees.clone(),
            metrics,
        };
        let monitoring = MonitoringConfig {
            log_requests: false,
            ..MonitoringConfig::default()
        };
        let auth = auth.map(|config| AuthLayer::from_config(&config).unwrap());

        Self {
            router: router(state, &monitoring, auth),
            base,
            tasks,
            worktrees,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }
}

#[tokio::test]
async fn health_reflects_component_state() {
    let app = App::new(4, None);

    let (status, body) = app.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].as_str().unwrap().contains("task manager"));

    app.worktrees.start().await.unwrap();
    app.tasks.start().await.unwrap();
    let (status, body) = app.call(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
    app.tasks.stop(Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn task_routes() {
    let app = App::new(4, None);
    let project = app.base.path().to_string_lossy().to_string();

    let (status, task) = app
        .call(
            Method::POST,
            "/tasks",
            Some(json!({"projectPath": project, "command": "fix", "timeout": "10m"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(task["status"], "pending");
    assert_eq!(task["timeout"], "10m");
    let id = task["id"].as_str().unwrap().to_string();

    let (status, fetched) = app.call(Method::GET, &format!("/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["command"], "fix");

    let (status, listed) = app.call(Method::GET, "/tasks?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);

    let (status, _) = app.call(Method::DELETE, &format!("/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call(Method::DELETE, &format!("/tasks/{id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already finished"));

    let (status, listed) = app.call(Method::GET, "/tasks?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 0);
}

#[tokio::test]
async fn unknown_task_is_404_with_error_body() {
    let app = App::new(4, None);
    let (status, body) = app.call(Method::GET, "/tasks/task_nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("task_nope"));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn malformed_task_body_is_400() {
    let app = App::new(4, None);
    let (status, body) = app
        .call(Method::POST, "/tasks", Some(json!({"command": "fix"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn full_queue_is_503() {
    let app = App::new(1, None);
    let project = app.base.path().to_string_lossy().to_string();
    let body = json!({"projectPath": project});

    let (status, _) = app.call(Method::POST, "/tasks", Some(body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = app.call(Method::POST, "/tasks", Some(body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("queue is full"));
}

#[tokio::test]
async fn worktree_routes() {
    let app = App::new(4, None);
    app.worktrees.start().await.unwrap();
    let project = TempDir::new().unwrap();
    std::fs::write(project.path().join("README.md"), "# demo\n").unwrap();
    let worktree = app.worktrees.create_worktree(project.path()).await.unwrap();

    let (status, listed) = app.call(Method::GET, "/worktrees", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["worktrees"][0]["status"], "active");

    let uri = format!("/worktrees/{}", worktree.id);
    let (status, fetched) = app.call(Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], worktree.id.as_str());

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!worktree.path.exists());

    let (status, _) = app.call(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_count_tasks_by_status() {
    let app = App::new(4, None);
    let project = app.base.path().to_string_lossy().to_string();
    for _ in 0..2 {
        app.call(Method::POST, "/tasks", Some(json!({"projectPath": project})))
            .await;
    }

    let (status, metrics) = app.call(Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["tasks"]["total"], 2);
    assert_eq!(metrics["tasks"]["byStatus"]["pending"], 2);
    assert_eq!(metrics["tasks"]["byStatus"]["completed"], 0);
    assert_eq!(metrics["worktrees"]["byStatus"]["idle"], 0);
    assert_eq!(metrics["counters"]["tasksSubmitted"], 2);
}

#[tokio::test]
async fn mcp_endpoint_speaks_json_rpc() {
    let app = App::new(4, None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .body(Body::from("not json"))
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], -32700);

    let (status, body) = app
        .call(
            Method::POST,
            "/mcp",
            Some(json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"execute_task"));
    assert!(names.contains(&"list_tasks"));
}

fn auth_config() -> AuthConfig {
    AuthConfig {
        enabled: true,
        token_file: None,
        tokens: vec!["s3cret".to_string()],
        allowed_ips: vec!["10.0.0.0/8".to_string(), "::1".to_string()],
        trust_proxy_headers: true,
    }
}

#[tokio::test]
async fn auth_rejects_by_ip_then_token() {
    let app = App::new(4, Some(auth_config()));
    let request = |ip: &str, token: Option<&str>| {
        let mut builder = Request::builder().uri("/tasks").header("x-forwarded-for", ip);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    };

    let (status, body) = app.send(request("192.168.1.10", Some("s3cret"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("192.168.1.10"));

    let (status, _) = app.send(request("10.2.3.4", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.send(request("10.2.3.4", Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send(request("10.2.3.4", Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn spoofed_forwarded_for_is_ignored_by_default() {
    let auth = AuthConfig {
        trust_proxy_headers: false,
        ..auth_config()
    };
    let app = App::new(4, Some(auth));
    let request = Request::builder()
        .uri("/tasks")
        .header("x-forwarded-for", "10.2.3.4")
        .header("authorization", "Bearer s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_bypasses_auth() {
    let app = App::new(4, Some(auth_config()));
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap();
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
}
