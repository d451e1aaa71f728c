// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The stdio line protocol, driven over an in-memory duplex pipe.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;

use dispatch::config::{TaskConfig, WorktreeConfig};
use dispatch::protocol::ProtocolHandler;
use dispatch::task::executor::{ExecutionOutput, ExecutorError, Invocation, ProcessExecutor};
use dispatch::task::WorkerPool;
use dispatch::telemetry::Metrics;
use dispatch::transport::StdioTransport;
use dispatch::worktree::WorktreePool;

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

struct Peer {
    _base: TempDir,
    handler: Arc<ProtocolHandler>,
    transport: StdioTransport,
    reader: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    async fn connect() -> Self {
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
            TaskConfig::default(),
            worktrees.clone(),
            Arc::new(NoopExecutor),
            metrics,
        ));
        let handler = Arc::new(ProtocolHandler::new(tasks, worktrees));

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (client_read, client_write) = tokio::io::split(client);

        let transport = StdioTransport::with_io(Arc::clone(&handler), server_read, server_write);
        transport.start().await.unwrap();

        Self {
            _base: base,
            handler,
            transport,
            reader: BufReader::new(client_read).lines(),
            writer: client_write,
        }
    }

    async fn send(&mut self, raw: &str) {
        self.send_bytes(raw.as_bytes()).await;
    }

    async fn send_bytes(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(5), self.reader.next_line())
            .await
            .expect("timed out waiting for a response")
            .unwrap()
            .expect("stream closed");
        serde_json::from_str(&line).unwrap()
    }
}

#[tokio::test]
async fn malformed_line_gets_parse_error_with_null_id() {
    let mut peer = Peer::connect().await;
    peer.send("{\"jsonrpc\": \"2.0\", \"id\": 1,\n").await;

    let response = peer.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
    assert!(response["error"]["data"].is_string());

    // The channel keeps going after a bad line.
    peer.send("{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n").await;
    assert_eq!(peer.recv().await["id"], 2);
}

#[tokio::test]
async fn invalid_utf8_line_gets_parse_error() {
    let mut peer = Peer::connect().await;
    peer.send_bytes(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"\xff}\n")
        .await;

    let response = peer.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);

    peer.send("{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n").await;
    let response = peer.recv().await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["result"], json!({}));
}

#[tokio::test]
async fn responses_preserve_request_order() {
    let mut peer = Peer::connect().await;
    let batch = [
        json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"}),
        json!({"jsonrpc": "2.0", "id": "four", "method": "ping"}),
    ]
    .iter()
    .map(|r| format!("{}\n", r))
    .collect::<String>();
    peer.send(&batch).await;

    let first = peer.recv().await;
    assert_eq!(first["id"], 1);
    assert_eq!(first["result"], json!({}));

    let second = peer.recv().await;
    assert_eq!(second["id"], 2);
    assert_eq!(second["result"]["tools"].as_array().unwrap().len(), 4);

    let third = peer.recv().await;
    assert_eq!(third["id"], 3);
    assert_eq!(third["error"]["code"], -32601);

    assert_eq!(peer.recv().await["id"], "four");
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let mut peer = Peer::connect().await;
    peer.send("\n   \n{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n").await;
    assert_eq!(peer.recv().await["id"], 9);
}

#[tokio::test]
async fn version_mismatch_leaves_handler_uninitialized() {
    let mut peer = Peer::connect().await;
    let request = |version: &str| {
        format!(
            "{}\n",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": {"protocolVersion": version, "capabilities": {}}
            })
        )
    };

    peer.send(&request("2099-01-01")).await;
    let response = peer.recv().await;
    assert_eq!(response["error"]["code"], -32602);
    assert!(!peer.handler.is_initialized());

    peer.send(&request("2024-11-05")).await;
    let response = peer.recv().await;
    assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
    assert!(peer.handler.is_initialized());
}

#[tokio::test]
async fn tool_errors_are_soft() {
    let mut peer = Peer::connect().await;
    let request = json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "tools/call",
        "params": {"name": "get_task_status", "arguments": {"taskId": "task_missing"}}
    });
    peer.send(&format!("{}\n", request)).await;

    let response = peer.recv().await;
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("task_missing"));

    let request = json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "tools/call",
        "params": {"name": "nope", "arguments": {}}
    });
    peer.send(&format!("{}\n", request)).await;

    let response = peer.recv().await;
    assert_eq!(response["id"], 6);
    assert!(response.get("error").is_none());
    assert_eq!(response["result"]["isError"], true);
    assert_eq!(response["result"]["content"][0]["text"], "Unknown tool: nope");
}

#[tokio::test]
async fn end_of_input_closes_channel() {
    let mut peer = Peer::connect().await;
    let closed = peer.transport.closed();
    peer.writer.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), closed.cancelled())
        .await
        .expect("channel did not close on EOF");
    peer.transport.stop().await.unwrap();
}

#[tokio::test]
async fn stop_ends_loop_while_idle() {
    let peer = Peer::connect().await;
    let closed = peer.transport.closed();
    peer.transport.stop().await.unwrap();
    assert!(closed.is_cancelled());
    // Streams are consumed; a second start is refused.
    assert!(peer.transport.start().await.is_err());
}
