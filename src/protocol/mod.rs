// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP over JSON-RPC 2.0.
//!
//! Methods: `initialize`, `tools/list`, `tools/call`, `ping` and the
//! `notifications/initialized` acknowledgement. Tool failures are soft (`isError` results);
//! only parse, envelope and dispatch failures become JSON-RPC errors.

mod error;
mod handler;
pub mod jsonrpc;
mod tools;
mod types;

pub use error::ProtocolError;
pub use handler::ProtocolHandler;
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use tools::{ToolKind, ToolRegistry};
pub use types::{
    CallToolRequest, CallToolResult, Implementation, InitializeRequest, InitializeResult,
    ListToolsResult, PropertySchema, PropertyType, ServerCapabilities, Tool, ToolContent,
    ToolSchema, ToolsCapability, PROTOCOL_VERSION,
};
