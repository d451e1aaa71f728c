// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Newline-delimited JSON over stdin/stdout.
//!
//! One request per line in, one response per line out, strictly in order. Requests are handled
//! one at a time. Logging goes to stderr so it never interleaves with responses.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::TransportError;
use crate::protocol::{JsonRpcResponse, ProtocolError, ProtocolHandler};

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

struct Running {
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), TransportError>>,
}

pub struct StdioTransport {
    handler: Arc<ProtocolHandler>,
    io: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    running: Mutex<Option<Running>>,
    closed: CancellationToken,
}

impl StdioTransport {
    /// Serve the process's stdin and stdout.
    pub fn new(handler: Arc<ProtocolHandler>) -> Self {
        Self::with_io(handler, tokio::io::stdin(), tokio::io::stdout())
    }

    /// Serve arbitrary streams.
    pub fn with_io(
        handler: Arc<ProtocolHandler>,
        reader: impl AsyncRead + Unpin + Send + 'static,
        writer: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            handler,
            io: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            running: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Fires once the line loop exits, either on end of input or on stop.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Start the line loop. The streams are consumed, so a stopped channel cannot restart.
    pub async fn start(&self) -> Result<(), TransportError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TransportError::AlreadyRunning("stdio"));
        }
        let Some((reader, writer)) = self.io.lock().await.take() else {
            return Err(TransportError::AlreadyRunning("stdio"));
        };

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn({
            let handler = Arc::clone(&self.handler);
            let shutdown = shutdown.clone();
            let closed = self.closed.clone();
            async move {
                let result = serve_lines(handler, reader, writer, shutdown).await;
                if let Err(e) = &result {
                    error!(error = %e, "stdio transport failed");
                }
                closed.cancel();
                result
            }
        });

        info!("stdio transport started");
        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        running.shutdown.cancel();
        match running.handle.await {
            Ok(result) => result,
            Err(e) => Err(TransportError::TaskFailed {
                channel: "stdio",
                message: e.to_string(),
            }),
        }
    }
}

/// Read requests line by line until end of input or shutdown.
///
/// A line that is not valid UTF-8 gets a parse error like any other malformed line.
pub async fn serve_lines(
    handler: Arc<ProtocolHandler>,
    reader: impl AsyncRead + Unpin,
    mut writer: impl AsyncWrite + Unpin,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            debug!("stdin closed");
            break;
        }

        let response = match std::str::from_utf8(&buf) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                handler.handle_message(line, &shutdown).await
            }
            Err(e) => {
                debug!(error = %e, "Rejecting non UTF-8 line");
                JsonRpcResponse::failure(
                    Value::Null,
                    ProtocolError::Parse(e.to_string()).to_rpc_error(),
                )
            }
        };

        let mut out = serde_json::to_vec(&response)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}
