// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for performance monitoring.
//!
//! Lightweight in-process counters, no external collector. One [`Metrics`] instance is owned by
//! the server and shared with the task manager and worktree pool; `/metrics` serves a snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::task::TaskState;

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Finished task durations by terminal state.
    outcomes: RwLock<HashMap<TaskState, OutcomeMetrics>>,

    /// Monotonic counters.
    counters: Counters,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            outcomes: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record an accepted submission.
    pub fn record_submitted(&self) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission rejected because the queue was full.
    pub fn record_rejected(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task reaching a terminal state after running for `duration`.
    pub fn record_outcome(&self, state: TaskState, duration: Duration) {
        let mut outcomes = self.outcomes.write().unwrap_or_else(PoisonError::into_inner);
        outcomes
            .entry(state)
            .or_insert_with(OutcomeMetrics::new)
            .record(duration);
    }

    /// Record a workspace allocation.
    pub fn record_worktree_created(&self) {
        self.counters.worktrees_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record workspaces removed by TTL eviction.
    pub fn record_worktrees_evicted(&self, count: u64) {
        self.counters
            .worktrees_evicted
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Record terminal tasks removed by the reaper.
    pub fn record_tasks_reaped(&self, count: u64) {
        self.counters.tasks_reaped.fetch_add(count, Ordering::Relaxed);
    }

    /// Get metrics for one terminal state.
    pub fn outcome_metrics(&self, state: TaskState) -> Option<OutcomeMetrics> {
        self.outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&state)
            .cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let outcomes = self.outcomes.read().unwrap_or_else(PoisonError::into_inner);

        MetricsSnapshot {
            tasks_submitted: self.counters.submitted.load(Ordering::Relaxed),
            tasks_rejected: self.counters.rejected.load(Ordering::Relaxed),
            tasks_reaped: self.counters.tasks_reaped.load(Ordering::Relaxed),
            worktrees_created: self.counters.worktrees_created.load(Ordering::Relaxed),
            worktrees_evicted: self.counters.worktrees_evicted.load(Ordering::Relaxed),
            outcomes: outcomes
                .iter()
                .map(|(state, metrics)| (state.to_string(), metrics.summary()))
                .collect(),
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    tasks_reaped: AtomicU64,
    worktrees_created: AtomicU64,
    worktrees_evicted: AtomicU64,
}

/// Duration statistics for tasks that ended in one state.
#[derive(Debug, Clone)]
pub struct OutcomeMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OutcomeMetrics {
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }

    fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            count: self.count,
            avg_ms: self.avg_duration().as_millis() as u64,
            max_ms: self.max_duration.as_millis() as u64,
            p50_ms: self.histogram.percentile(50.0).as_millis() as u64,
            p99_ms: self.histogram.percentile(99.0).as_millis() as u64,
        }
    }
}

impl Default for OutcomeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for task run times.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in milliseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in milliseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| millis <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Calculate approximate percentile (upper bucket bound).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let millis = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_millis(millis);
            }
        }

        Duration::ZERO
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1s, 10s, 1m, 5m, 15m, 1h
        Self::with_buckets(vec![1_000, 10_000, 60_000, 300_000, 900_000, 3_600_000])
    }
}

/// Serializable view of one outcome bucket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub count: u64,
    pub avg_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p99_ms: u64,
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_reaped: u64,
    pub worktrees_created: u64,
    pub worktrees_evicted: u64,
    pub outcomes: BTreeMap<String, OutcomeSummary>,
    pub uptime_secs: u64,
}
