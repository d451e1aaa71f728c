// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and metrics infrastructure.
//!
//! - **Tracing**: structured logging to stderr, filtered by `RUST_LOG` or the configured level
//! - **Metrics**: task and worktree counters served on `/metrics`
//!
//! # Usage
//!
//! ```rust,ignore
//! use dispatch::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_settings("info", "compact"))?;
//! ```
//!
//! Log with structured fields so task and worktree IDs can be grepped across components:
//!
//! ```rust,ignore
//! tracing::info!(task_id = %task.id, "Task submitted");
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OutcomeMetrics, OutcomeSummary};
