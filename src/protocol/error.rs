// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hard protocol failures, reported as JSON-RPC errors.
//!
//! Tool-level problems never end up here; they are soft `isError` results.

use thiserror::Error;

use super::jsonrpc::{
    JsonRpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown method: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unsupported protocol version {requested}, server supports {supported}")]
    VersionMismatch { requested: String, supported: String },

    #[error("Service unhealthy: {0}")]
    Unhealthy(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProtocolError {
    /// JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::VersionMismatch { .. } => INVALID_PARAMS,
            Self::Unhealthy(_) | Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_)
            | Self::InvalidRequest(_)
            | Self::InvalidParams(_)
            | Self::VersionMismatch { .. } => ErrorKind::InvalidInput,
            Self::MethodNotFound(_) => ErrorKind::NotFound,
            Self::Unhealthy(_) => ErrorKind::CapacityExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Standard error object: canonical message, details in `data`.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let message = match self.code() {
            PARSE_ERROR => "Parse error",
            INVALID_REQUEST => "Invalid Request",
            METHOD_NOT_FOUND => "Method not found",
            INVALID_PARAMS => "Invalid params",
            _ => "Internal error",
        };
        JsonRpcError::new(self.code(), message, self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_is_invalid_params() {
        let err = ProtocolError::VersionMismatch {
            requested: "1999-01-01".to_string(),
            supported: "2024-11-05".to_string(),
        };
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.message, "Invalid params");
        assert!(rpc.data.unwrap().as_str().unwrap().contains("1999-01-01"));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_codes() {
        assert_eq!(ProtocolError::Parse("x".into()).code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest("x".into()).code(), -32600);
        assert_eq!(ProtocolError::MethodNotFound("x".into()).code(), -32601);
        assert_eq!(ProtocolError::Internal("x".into()).code(), -32603);
    }
}
