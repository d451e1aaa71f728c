// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport channels feeding the shared protocol handler.
//!
//! A [`Multiplexer`] owns any number of [`Transport`]s. Each can be started and stopped on its
//! own; the multiplexer starts them in order and stops them all before a deadline.

pub mod auth;
mod error;
pub mod http;
pub mod stdio;

pub use auth::{AccessCheck, AuthLayer, IpAllowList, IpRule, Rejection, TokenAllowList};
pub use error::TransportError;
pub use http::{router, ApiError, AppState, HttpTransport};
pub use stdio::{serve_lines, StdioTransport};

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// A concrete channel.
pub enum Transport {
    Http(HttpTransport),
    Stdio(StdioTransport),
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Stdio(_) => "stdio",
        }
    }

    pub async fn start(&self) -> Result<(), TransportError> {
        match self {
            Self::Http(t) => t.start().await,
            Self::Stdio(t) => t.start().await,
        }
    }

    pub async fn stop(&self) -> Result<(), TransportError> {
        match self {
            Self::Http(t) => t.stop().await,
            Self::Stdio(t) => t.stop().await,
        }
    }
}

/// Runs several channels side by side.
#[derive(Default)]
pub struct Multiplexer {
    channels: Vec<Transport>,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transport: Transport) -> Self {
        self.channels.push(transport);
        self
    }

    pub fn channels(&self) -> &[Transport] {
        &self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start every channel in order. On the first failure, channels already started are stopped
    /// again and that failure is returned.
    pub async fn start(&self) -> Result<(), TransportError> {
        for (i, channel) in self.channels.iter().enumerate() {
            if let Err(err) = channel.start().await {
                for started in self.channels[..i].iter().rev() {
                    if let Err(e) = started.stop().await {
                        warn!(channel = started.name(), error = %e, "Failed to roll back transport");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stop every channel, collecting failures. The whole call is bounded by `deadline`.
    pub async fn stop(&self, deadline: Duration) -> Result<(), TransportError> {
        let until = Instant::now() + deadline;
        let mut errors = Vec::new();
        for channel in &self.channels {
            match tokio::time::timeout_at(until, channel.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(_) => errors.push(TransportError::StopTimeout {
                    channel: channel.name(),
                    deadline,
                }),
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(TransportError::Multiple(errors)),
        }
    }
}
