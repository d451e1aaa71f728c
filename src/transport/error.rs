// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transport error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors that can occur while running a transport channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to bind the HTTP listener.
    #[error("Failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },

    /// The channel is already running.
    #[error("{0} transport is already running")]
    AlreadyRunning(&'static str),

    /// Failed to read auth tokens.
    #[error("Failed to load auth tokens from {path}: {message}")]
    TokenFile { path: String, message: String },

    /// Malformed auth settings.
    #[error("Invalid auth configuration: {0}")]
    InvalidAuth(String),

    /// The serving task panicked or returned an error.
    #[error("{channel} transport task failed: {message}")]
    TaskFailed {
        channel: &'static str,
        message: String,
    },

    /// The channel did not shut down before the deadline.
    #[error("{channel} transport did not stop within {deadline:?}")]
    StopTimeout {
        channel: &'static str,
        deadline: Duration,
    },

    /// Several channels failed to stop.
    #[error("Failed to stop transports: {}", join(.0))]
    Multiple(Vec<TransportError>),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn join(errors: &[TransportError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BindFailed { .. } | Self::Io(_) => ErrorKind::ExternalDependency,
            Self::AlreadyRunning(_) => ErrorKind::Conflict,
            Self::TokenFile { .. } | Self::InvalidAuth(_) => ErrorKind::InvalidInput,
            Self::TaskFailed { .. } | Self::StopTimeout { .. } | Self::Multiple(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_joins_messages() {
        let err = TransportError::Multiple(vec![
            TransportError::AlreadyRunning("http"),
            TransportError::StopTimeout {
                channel: "stdio",
                deadline: Duration::from_secs(1),
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("http transport is already running"));
        assert!(message.contains("stdio transport did not stop"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
