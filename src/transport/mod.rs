//! Transport layer implementations for MCP protocol
//!
//! Supports multiple transport methods:
//! - stdio: Standard input/output for local CLI integration
//! - http: HTTP/SSE for web applications and remote access

#[cfg(feature = "stdio-transport")]
pub mod stdio;
#[cfg(feature = "http-transport")]
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

#[cfg(feature = "stdio-transport")]
pub use stdio::StdioTransport;
#[cfg(feature = "http-transport")]
pub use http::HttpTransport;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC request id: a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// JSON-RPC 2.0 message wrapper for proper serialization.
///
/// Variant order matters for untagged decoding: a message with both `id`
/// and `method` is a request, `method` alone is a notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request {
        jsonrpc: String,
        id: RequestId,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Notification {
        jsonrpc: String,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    Response {
        jsonrpc: String,
        id: Option<RequestId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<McpError>,
    },
}

/// MCP message types (internal representation)
#[derive(Debug, Clone)]
pub enum McpMessage {
    Initialize {
        id: RequestId,
        params: InitializeParams,
    },
    Ping {
        id: RequestId,
    },
    ToolsList {
        id: RequestId,
    },
    ToolsCall {
        id: RequestId,
        params: ToolsCallParams,
    },
    ResourcesList {
        id: RequestId,
    },
    ResourcesRead {
        id: RequestId,
        params: ResourcesReadParams,
    },
    PromptsList {
        id: RequestId,
    },
    PromptsGet {
        id: RequestId,
        params: PromptsGetParams,
    },
    /// Request for a method this server does not implement
    Unsupported {
        id: RequestId,
        method: String,
    },
    /// Known method whose params failed to decode
    InvalidParams {
        id: RequestId,
        method: String,
        message: String,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Option<RequestId>,
        result: Option<Value>,
        error: Option<McpError>,
    },
}

/// Initialize parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeParams {
    pub protocol_version: Option<String>,
    pub capabilities: Option<Value>,
    pub client_info: Option<ClientInfo>,
}

/// Client info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Tool call parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesReadParams {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Map<String, Value>>,
}

/// `notifications/cancelled` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    pub request_id: RequestId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// MCP error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&crate::Error> for McpError {
    fn from(error: &crate::Error) -> Self {
        Self {
            code: error.json_rpc_code(),
            message: error.to_string(),
            data: serde_json::to_value(error.to_record()).ok(),
        }
    }
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, String> {
    serde_json::from_value(params.unwrap_or(Value::Object(Map::new()))).map_err(|e| e.to_string())
}

impl McpMessage {
    pub fn result(id: RequestId, result: Value) -> Self {
        McpMessage::Response {
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: McpError) -> Self {
        McpMessage::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Id of a request, `None` for notifications and responses
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            McpMessage::Initialize { id, .. }
            | McpMessage::Ping { id }
            | McpMessage::ToolsList { id }
            | McpMessage::ToolsCall { id, .. }
            | McpMessage::ResourcesList { id }
            | McpMessage::ResourcesRead { id, .. }
            | McpMessage::PromptsList { id }
            | McpMessage::PromptsGet { id, .. }
            | McpMessage::Unsupported { id, .. }
            | McpMessage::InvalidParams { id, .. } => Some(id),
            McpMessage::Notification { .. } | McpMessage::Response { .. } => None,
        }
    }

    /// Convert MCP message to JSON-RPC message for serialization
    pub fn to_jsonrpc(&self) -> JsonRpcMessage {
        let request = |id: &RequestId, method: &str, params: Option<Value>| JsonRpcMessage::Request {
            jsonrpc: "2.0".to_string(),
            id: id.clone(),
            method: method.to_string(),
            params,
        };
        match self {
            McpMessage::Initialize { id, params } => {
                request(id, "initialize", serde_json::to_value(params).ok())
            }
            McpMessage::Ping { id } => request(id, "ping", None),
            McpMessage::ToolsList { id } => request(id, "tools/list", None),
            McpMessage::ToolsCall { id, params } => {
                request(id, "tools/call", serde_json::to_value(params).ok())
            }
            McpMessage::ResourcesList { id } => request(id, "resources/list", None),
            McpMessage::ResourcesRead { id, params } => {
                request(id, "resources/read", serde_json::to_value(params).ok())
            }
            McpMessage::PromptsList { id } => request(id, "prompts/list", None),
            McpMessage::PromptsGet { id, params } => {
                request(id, "prompts/get", serde_json::to_value(params).ok())
            }
            McpMessage::Unsupported { id, method } | McpMessage::InvalidParams { id, method, .. } => {
                request(id, method, None)
            }
            McpMessage::Notification { method, params } => JsonRpcMessage::Notification {
                jsonrpc: "2.0".to_string(),
                method: method.clone(),
                params: params.clone(),
            },
            McpMessage::Response { id, result, error } => JsonRpcMessage::Response {
                jsonrpc: "2.0".to_string(),
                id: id.clone(),
                result: result.clone(),
                error: error.clone(),
            },
        }
    }

    /// Convert JSON-RPC message to MCP message.
    ///
    /// Unknown methods and undecodable params become [`McpMessage::Unsupported`]
    /// and [`McpMessage::InvalidParams`] so the server can answer them.
    pub fn from_jsonrpc(jsonrpc: JsonRpcMessage) -> Self {
        match jsonrpc {
            JsonRpcMessage::Request { id, method, params, .. } => {
                let invalid = |id: RequestId, method: &str, message: String| McpMessage::InvalidParams {
                    id,
                    method: method.to_string(),
                    message,
                };
                match method.as_str() {
                    "initialize" => match decode_params(params) {
                        Ok(params) => McpMessage::Initialize { id, params },
                        Err(e) => invalid(id, &method, e),
                    },
                    "ping" => McpMessage::Ping { id },
                    "tools/list" => McpMessage::ToolsList { id },
                    "tools/call" => match decode_params(params) {
                        Ok(params) => McpMessage::ToolsCall { id, params },
                        Err(e) => invalid(id, &method, e),
                    },
                    "resources/list" => McpMessage::ResourcesList { id },
                    "resources/read" => match decode_params(params) {
                        Ok(params) => McpMessage::ResourcesRead { id, params },
                        Err(e) => invalid(id, &method, e),
                    },
                    "prompts/list" => McpMessage::PromptsList { id },
                    "prompts/get" => match decode_params(params) {
                        Ok(params) => McpMessage::PromptsGet { id, params },
                        Err(e) => invalid(id, &method, e),
                    },
                    _ => McpMessage::Unsupported { id, method },
                }
            }
            JsonRpcMessage::Notification { method, params, .. } => {
                McpMessage::Notification { method, params }
            }
            JsonRpcMessage::Response { id, result, error, .. } => {
                McpMessage::Response { id, result, error }
            }
        }
    }
}

impl JsonRpcMessage {
    /// Create JsonRpcMessage from a JSON Value
    pub fn from_json_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| anyhow::Error::new(e).context("Failed to parse JSON-RPC message"))
    }

    /// Convert to MCP message
    pub fn to_mcp_message(self) -> McpMessage {
        McpMessage::from_jsonrpc(self)
    }

    /// Convert to JSON Value
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Decode one raw JSON-RPC text into a message, or the error reply for it
pub fn parse_message(raw: &str) -> std::result::Result<McpMessage, McpMessage> {
    let value: Value = serde_json::from_str(raw).map_err(|e| {
        McpMessage::error(None, McpError::new(PARSE_ERROR, format!("Parse error: {e}")))
    })?;
    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
    match JsonRpcMessage::from_json_value(value) {
        Ok(message) => Ok(message.to_mcp_message()),
        Err(e) => Err(McpMessage::error(
            id,
            McpError::new(INVALID_REQUEST, format!("Invalid request: {e:#}")),
        )),
    }
}

/// Run a message through the handler, turning handler failures into
/// an internal-error reply when the message expects one
pub async fn dispatch(handler: &dyn MessageHandler, message: McpMessage) -> Option<McpMessage> {
    let id = message.request_id().cloned();
    match handler.handle_message(message).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("Message handling failed: {e:#}");
            id.map(|id| McpMessage::error(Some(id), McpError::new(INTERNAL_ERROR, e.to_string())))
        }
    }
}

/// Message handler trait for processing incoming MCP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle an incoming MCP message
    async fn handle_message(&self, message: McpMessage) -> Result<Option<McpMessage>>;

    /// Body of the HTTP health probe
    async fn health(&self) -> Value {
        serde_json::json!({"status": "healthy"})
    }
}

/// Trait for all transport implementations
#[async_trait]
pub trait Transport {
    /// Start the transport and begin handling connections
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Stop the transport gracefully
    async fn shutdown(&self) -> Result<()>;

    /// Send a server-initiated message through the transport
    async fn send_message(&self, message: McpMessage) -> Result<()>;
}
