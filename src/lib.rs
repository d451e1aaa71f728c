// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! dispatch - task dispatch server for coding agents.
//!
//! A controlling agent submits coding jobs over JSON-RPC. dispatch queues them, gives each one an
//! isolated git worktree (or a plain copy for non-git projects), runs the configured agent in it
//! on a bounded worker pool, and reports status and results back.
//!
//! # Architecture
//!
//! - [`task`] - Task manager: bounded queue, worker pool, state machine, cancellation, reaper
//! - [`worktree`] - Worktree pool: allocation, LRU eviction of idle entries, crash recovery
//! - [`protocol`] - MCP over JSON-RPC 2.0: handshake, tool registry, dispatch
//! - [`transport`] - HTTP and stdio channels sharing one protocol handler
//! - [`server`] - Composition and lifecycle of all of the above
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing setup and in-process metrics
//! - [`error`] - Error types and their classification
//!
//! # Example
//!
//! ```rust,ignore
//! use dispatch::config::{load_config, CliOptions};
//! use dispatch::server::DispatchServer;
//!
//! let config = load_config(".".as_ref(), None, CliOptions::default())?;
//! let server = DispatchServer::new(config)?;
//! server.start().await?;
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod task;
pub mod telemetry;
pub mod transport;
pub mod worktree;

// Re-export commonly used types at crate root
pub use error::{ConfigError, ErrorKind, Result, TaskError, WorktreeError};
pub use server::{DispatchServer, ServerError};
pub use task::{Task, TaskManager, TaskRequest, TaskState};
pub use worktree::{WorktreeInfo, WorktreeManager};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
