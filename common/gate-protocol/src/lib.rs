//! Wire protocol for the toolgate gateway
//!
//! Frames are JSON objects sent as WebSocket text messages, discriminated by
//! a `type` field. This crate is shared by the gateway server, its tests,
//! and any Rust client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Frames
// ============================================================================

/// Frame sent by a client to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on every connection; authenticates and binds a session
    Hello {
        /// Bearer token, verified against the gateway's configured secret
        token: String,
        /// Resume an existing unexpired session; omit to get a fresh one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Ask for the gateway's tool inventory
    ListTools { request_id: String },
    /// Invoke a named tool
    CallTool {
        request_id: String,
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Cancel an in-flight request
    Cancel { request_id: String },
}

/// Frame sent by the gateway to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake reply; exactly one per connection
    HelloAck {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Tool inventory reply
    ListToolsRes {
        request_id: String,
        tools: Vec<ToolInfo>,
    },
    /// Work has been admitted and started; sent before any tool output
    CallToolAck { request_id: String },
    /// Intermediate progress note, zero or more per request, in order
    Progress { request_id: String, note: String },
    /// Terminal success frame for a request
    CallToolRes {
        request_id: String,
        outputs: Vec<serde_json::Value>,
    },
    /// Terminal failure for a request, or connection-level if `request_id`
    /// is absent
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        kind: ErrorKind,
        message: String,
    },
}

/// Tool metadata advertised via `list_tools_res`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Machine-readable error class carried in the wire `error.kind` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing token; connection-level, terminal
    AuthError,
    /// Malformed or unexpected frame; connection-level
    ProtocolError,
    /// Capacity exceeded; expected and retryable by the client
    AdmissionRejected,
    /// Reused `request_id` within a session; terminal for that request only
    DuplicateRequest,
    /// Tool-internal failure; terminal for the request, connection stays open
    ToolExecutionError,
    /// Every provider in the fallback chain was exhausted or circuit-open
    ProviderUnavailable,
    /// Admission or execution deadline exceeded
    Timeout,
}

/// Gateway error carrying its wire classification
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("duplicate request_id: {0}")]
    DuplicateRequest(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("no provider available: {0}")]
    ProviderUnavailable(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),
}

impl GatewayError {
    /// Wire classification for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::AuthError,
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::AdmissionRejected(_) => ErrorKind::AdmissionRejected,
            Self::DuplicateRequest(_) => ErrorKind::DuplicateRequest,
            Self::ToolExecution(_) => ErrorKind::ToolExecutionError,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }

    /// True for errors that close the whole connection rather than a single
    /// request
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Protocol(_))
    }
}

impl ServerFrame {
    /// Build the terminal `error` frame for a failed request
    pub fn request_error(request_id: impl Into<String>, err: &GatewayError) -> Self {
        Self::Error {
            request_id: Some(request_id.into()),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Build a connection-level `error` frame (no `request_id`)
    pub fn connection_error(err: &GatewayError) -> Self {
        Self::Error {
            request_id: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Codec helpers
// ============================================================================

/// Decode a client frame from WebSocket text, mapping malformed input to
/// [`GatewayError::Protocol`]
pub fn decode_client(text: &str) -> Result<ClientFrame, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::Protocol(format!("bad frame: {e}")))
}

/// Decode a server frame (client side / tests)
pub fn decode_server(text: &str) -> Result<ServerFrame, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::Protocol(format!("bad frame: {e}")))
}

/// Encode a frame as WebSocket text
pub fn encode<T: Serialize>(frame: &T) -> Result<String, GatewayError> {
    serde_json::to_string(frame).map_err(|e| GatewayError::Protocol(format!("encode: {e}")))
}
