//! Error types for the store and the JSON-RPC/MCP transport.
//!
//! `StoreError` covers persistence failures; `McpError` covers everything
//! that must cross the wire as a JSON-RPC error object (§7 "Protocol
//! errors"). The transport layer is the only place a `McpError` is turned
//! into bytes — handlers never format JSON-RPC error bodies themselves.

use rusqlite::Error as SqliteError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("database error: {0}")]
    Db(#[from] SqliteError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// JSON-RPC error surfaced to a client. Numeric codes follow the JSON-RPC
/// reserved range for protocol-level faults, plus an Agorai-specific range
/// (-32000..-32099) for tool-level faults.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("parse error: {message}")]
    ParseError { message: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("invalid params: {message}")]
    InvalidParams { message: String },
    #[error("internal error: {message}")]
    InternalError { message: String },
    #[error("tool error: {message}")]
    ToolError { message: String },
    #[error("Not found or access denied")]
    NotFoundOrDenied,
    #[error("transport error: {message}")]
    TransportError { message: String },
    #[error("server not initialized")]
    NotInitialized,
}

impl McpError {
    pub fn error_code(&self) -> i64 {
        match self {
            McpError::ParseError { .. } => -32700,
            McpError::InvalidRequest { .. } => -32600,
            McpError::MethodNotFound { .. } => -32601,
            McpError::InvalidParams { .. } => -32602,
            McpError::InternalError { .. } => -32603,
            McpError::ToolError { .. } => -32000,
            McpError::NotFoundOrDenied => -32001,
            McpError::TransportError { .. } => -32002,
            McpError::NotInitialized => -32003,
        }
    }
}

impl From<StoreError> for McpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound | StoreError::Forbidden => McpError::NotFoundOrDenied,
            StoreError::Db(e) => McpError::InternalError {
                message: e.to_string(),
            },
            StoreError::Serde(e) => McpError::InternalError {
                message: e.to_string(),
            },
        }
    }
}
