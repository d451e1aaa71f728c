// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON-RPC method dispatch.
//!
//! One [`ProtocolHandler`] is shared by every transport. It turns `tools/call` invocations into
//! task manager operations and formats the results as MCP tool content.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::ProtocolError;
use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use super::tools::{ToolKind, ToolRegistry};
use super::types::{
    CallToolRequest, CallToolResult, Implementation, InitializeRequest, InitializeResult,
    ListToolsResult, ServerCapabilities, PROTOCOL_VERSION,
};
use crate::config::parse_duration;
use crate::task::{TaskManager, TaskRequest, TaskState, DEFAULT_PRIORITY};
use crate::worktree::WorktreeManager;

/// Dispatches JSON-RPC requests to the task manager.
pub struct ProtocolHandler {
    tasks: Arc<dyn TaskManager>,
    worktrees: Arc<dyn WorktreeManager>,
    registry: ToolRegistry,
    initialized: AtomicBool,
}

impl ProtocolHandler {
    pub fn new(tasks: Arc<dyn TaskManager>, worktrees: Arc<dyn WorktreeManager>) -> Self {
        Self {
            tasks,
            worktrees,
            registry: ToolRegistry::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether a client has completed the handshake.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn server_info() -> Implementation {
        Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Version handshake. A mismatch changes nothing.
    pub fn initialize(&self, request: InitializeRequest) -> Result<InitializeResult, ProtocolError> {
        if request.protocol_version != PROTOCOL_VERSION {
            warn!(
                requested = %request.protocol_version,
                supported = PROTOCOL_VERSION,
                "Rejected protocol version"
            );
            return Err(ProtocolError::VersionMismatch {
                requested: request.protocol_version,
                supported: PROTOCOL_VERSION.to_string(),
            });
        }

        self.initialized.store(true, Ordering::SeqCst);
        if let Some(client) = &request.client_info {
            info!(client = %client.name, version = %client.version, "Client initialized");
        }
        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: Self::server_info(),
        })
    }

    pub fn list_tools(&self) -> ListToolsResult {
        ListToolsResult {
            tools: self.registry.list(),
        }
    }

    /// Run a tool. Unknown names, bad arguments and task manager failures all come back as an
    /// `isError` result.
    pub async fn call_tool(
        &self,
        request: CallToolRequest,
        caller: &CancellationToken,
    ) -> Result<CallToolResult, ProtocolError> {
        let (kind, tool) = match self.registry.resolve(&request.name) {
            Ok(found) => found,
            Err(message) => {
                debug!(tool = %request.name, "Unknown tool");
                return Ok(CallToolResult::error(message));
            }
        };

        let arguments = request.arguments.unwrap_or_default();
        if let Err(message) = tool.input_schema.validate(&arguments) {
            debug!(tool = %request.name, %message, "Rejected tool arguments");
            return Ok(CallToolResult::error(message));
        }

        debug!(tool = %request.name, "Calling tool");
        Ok(match kind {
            ToolKind::ExecuteTask => self.execute_task(&arguments, caller).await,
            ToolKind::GetTaskStatus => self.get_task_status(&arguments).await,
            ToolKind::CancelTask => self.cancel_task(&arguments).await,
            ToolKind::ListTasks => self.list_tasks(&arguments).await,
        })
    }

    /// Fails if either the task manager or the worktree pool is unhealthy.
    pub async fn health_check(&self) -> Result<(), ProtocolError> {
        self.tasks
            .health_check()
            .await
            .map_err(|e| ProtocolError::Unhealthy(format!("task manager: {}", e)))?;
        self.worktrees
            .health_check()
            .await
            .map_err(|e| ProtocolError::Unhealthy(format!("worktree pool: {}", e)))?;
        Ok(())
    }

    /// Handle one raw message. Always produces a response; unparseable input gets `id: null`.
    pub async fn handle_message(&self, raw: &str, caller: &CancellationToken) -> JsonRpcResponse {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to parse JSON-RPC message");
                return JsonRpcResponse::failure(
                    Value::Null,
                    ProtocolError::Parse(e.to_string()).to_rpc_error(),
                );
            }
        };

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(value) {
            Ok(request) => self.handle_request(request, caller).await,
            Err(e) => JsonRpcResponse::failure(
                id,
                ProtocolError::InvalidRequest(e.to_string()).to_rpc_error(),
            ),
        }
    }

    /// Dispatch a parsed request.
    pub async fn handle_request(
        &self,
        request: JsonRpcRequest,
        caller: &CancellationToken,
    ) -> JsonRpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        match self.dispatch(request, caller).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => JsonRpcResponse::failure(id, err.to_rpc_error()),
        }
    }

    async fn dispatch(
        &self,
        request: JsonRpcRequest,
        caller: &CancellationToken,
    ) -> Result<Value, ProtocolError> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::InvalidRequest(format!(
                "jsonrpc must be \"{}\"",
                JSONRPC_VERSION
            )));
        }
        debug!(method = %request.method, "Dispatching request");

        match request.method.as_str() {
            "initialize" => to_value(&self.initialize(params(request.params)?)?),
            "notifications/initialized" | "ping" => Ok(json!({})),
            "tools/list" => to_value(&self.list_tools()),
            "tools/call" => to_value(&self.call_tool(params(request.params)?, caller).await?),
            other => Err(ProtocolError::MethodNotFound(other.to_string())),
        }
    }

    // ========================================================================
    // Tools
    // ========================================================================

    async fn execute_task(
        &self,
        arguments: &Map<String, Value>,
        caller: &CancellationToken,
    ) -> CallToolResult {
        let timeout = match string_arg(arguments, "timeout") {
            Some(raw) => match parse_duration(&raw) {
                Ok(timeout) => Some(timeout),
                Err(e) => return CallToolResult::error(format!("Invalid timeout: {}", e)),
            },
            None => None,
        };

        let request = TaskRequest {
            command: string_arg(arguments, "command"),
            args: arguments
                .get("args")
                .and_then(Value::as_array)
                .map(|args| {
                    args.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            context: arguments
                .get("context")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
            priority: arguments
                .get("priority")
                .and_then(Value::as_i64)
                .map(|p| p as i32)
                .unwrap_or(DEFAULT_PRIORITY),
            timeout,
            ..TaskRequest::new(PathBuf::from(
                string_arg(arguments, "projectPath").unwrap_or_default(),
            ))
        };

        match self.tasks.submit_task(request, caller).await {
            Ok(task) => CallToolResult::json(&json!({
                "taskId": task.id,
                "status": task.status,
                "projectPath": task.project_path,
                "message": "Task queued",
            })),
            Err(e) => CallToolResult::error(format!("Failed to submit task: {}", e)),
        }
    }

    async fn get_task_status(&self, arguments: &Map<String, Value>) -> CallToolResult {
        let id = string_arg(arguments, "taskId").unwrap_or_default();
        match self.tasks.get_task_status(&id).await {
            Ok(task) => CallToolResult::json(&task),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    async fn cancel_task(&self, arguments: &Map<String, Value>) -> CallToolResult {
        let id = string_arg(arguments, "taskId").unwrap_or_default();
        match self.tasks.cancel_task(&id).await {
            Ok(()) => CallToolResult::json(&json!({
                "taskId": id,
                "status": TaskState::Cancelled,
                "message": "Task cancelled",
            })),
            Err(e) => CallToolResult::error(e.to_string()),
        }
    }

    async fn list_tasks(&self, arguments: &Map<String, Value>) -> CallToolResult {
        let filter = match string_arg(arguments, "status").map(|s| s.parse::<TaskState>()) {
            Some(Ok(state)) => Some(state),
            Some(Err(e)) => return CallToolResult::error(e),
            None => None,
        };

        let tasks: Vec<_> = self
            .tasks
            .list_tasks()
            .await
            .into_iter()
            .filter(|t| filter.map_or(true, |state| t.status == state))
            .collect();
        CallToolResult::json(&json!({ "count": tasks.len(), "tasks": tasks }))
    }
}

fn string_arg(arguments: &Map<String, Value>, name: &str) -> Option<String> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ProtocolError> {
    let params = params.ok_or_else(|| ProtocolError::InvalidParams("missing params".to_string()))?;
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string()))
}

fn to_value(result: &impl Serialize) -> Result<Value, ProtocolError> {
    serde_json::to_value(result).map_err(|e| ProtocolError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TaskConfig, WorktreeConfig};
    use crate::protocol::jsonrpc::{INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::task::executor::{ExecutionOutput, ExecutorError, Invocation, ProcessExecutor};
    use crate::task::WorkerPool;
    use crate::telemetry::Metrics;
    use crate::worktree::WorktreePool;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

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

    fn handler(base: &TempDir) -> ProtocolHandler {
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
                queue_size: 4,
                ..TaskConfig::default()
            },
            worktrees.clone(),
            Arc::new(NoopExecutor),
            metrics,
        ));
        ProtocolHandler::new(tasks, worktrees)
    }

    async fn call(handler: &ProtocolHandler, raw: &str) -> JsonRpcResponse {
        handler.handle_message(raw, &CancellationToken::new()).await
    }

    fn tool_text(response: &JsonRpcResponse) -> (String, bool) {
        let result: CallToolResult =
            serde_json::from_value(response.result.clone().unwrap()).unwrap();
        (result.as_text(), result.is_error)
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let base = TempDir::new().unwrap();
        let handler = handler(&base);

        let response = call(
            &handler,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{}}}"#,
        )
        .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "dispatch");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert!(handler.is_initialized());
    }

    #[tokio::test]
    async fn test_version_mismatch_changes_nothing() {
        let base = TempDir::new().unwrap();
        let handler = handler(&base);

        let response = call(
            &handler,
            r#"{"jsonrpc":"2.0","id":7,"method":"initialize","params":{"protocolVersion":"2023-01-01"}}"#,
        )
        .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(response.id, json!(7));
        assert!(!handler.is_initialized());
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let base = TempDir::new().unwrap();
        let response = call(&handler(&base), "{not json").await;
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let base = TempDir::new().unwrap();
        let response = call(
            &handler(&base),
            r#"{"jsonrpc":"2.0","id":"x","method":"resources/list"}"#,
        )
        .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
        assert_eq!(response.id, json!("x"));
    }

    #[tokio::test]
    async fn test_missing_argument_is_soft_error() {
        let base = TempDir::new().unwrap();
        let response = call(
            &handler(&base),
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"execute_task","arguments":{}}}"#,
        )
        .await;
        assert!(response.error.is_none());
        let (text, is_error) = tool_text(&response);
        assert!(is_error);
        assert!(text.contains("projectPath"));
    }

    #[tokio::test]
    async fn test_execute_then_get_status() {
        let base = TempDir::new().unwrap();
        let handler = handler(&base);
        let request = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "execute_task",
                "arguments": {"projectPath": base.path(), "timeout": "5m", "priority": 1}
            }
        });

        let response = call(&handler, &request.to_string()).await;
        let (text, is_error) = tool_text(&response);
        assert!(!is_error, "{text}");
        let submitted: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(submitted["status"], "pending");

        let status = json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "get_task_status", "arguments": {"taskId": submitted["taskId"]}}
        });
        let response = call(&handler, &status.to_string()).await;
        let (text, is_error) = tool_text(&response);
        assert!(!is_error);
        let task: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(task["timeout"], "5m");
        assert_eq!(task["priority"], 1);
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_soft_error() {
        let base = TempDir::new().unwrap();
        let request = json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/call",
            "params": {
                "name": "execute_task",
                "arguments": {"projectPath": "/repo", "timeout": "soon"}
            }
        });
        let response = call(&handler(&base), &request.to_string()).await;
        let (text, is_error) = tool_text(&response);
        assert!(is_error);
        assert!(text.starts_with("Invalid timeout"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_soft_error() {
        let base = TempDir::new().unwrap();
        let response = call(
            &handler(&base),
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"nope"}}"#,
        )
        .await;
        assert!(response.error.is_none());
        let (text, is_error) = tool_text(&response);
        assert!(is_error);
        assert_eq!(text, "Unknown tool: nope");
    }

    #[tokio::test]
    async fn test_health_reports_stopped_workers() {
        let base = TempDir::new().unwrap();
        let err = handler(&base).health_check().await.unwrap_err();
        assert!(err.to_string().contains("task manager"));
    }

    #[tokio::test]
    async fn test_ping_and_wrong_version_field() {
        let base = TempDir::new().unwrap();
        let handler = handler(&base);
        let response = call(&handler, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).await;
        assert_eq!(response.result.unwrap(), json!({}));

        let response = call(&handler, r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).await;
        assert_eq!(response.error.unwrap().code, -32600);
    }
}
