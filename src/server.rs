//! Core MCP server implementation

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::client::FhirClient;
use crate::config::ServerConfig;
use crate::dispatcher::ToolDispatcher;
use crate::prompts::{self, PROMPTS};
use crate::resources::ResourceProvider;
use crate::session::SessionState;
use crate::transport::{INVALID_PARAMS, METHOD_NOT_FOUND, McpError, McpMessage, MessageHandler};

/// Protocol revision answered when the client asks for one we don't know
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Revisions echoed back when requested
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

const SERVER_NAME: &str = "blaze-mcp";

const INSTRUCTIONS: &str = "Blaze FHIR server adapter. Use the tools to read, search and modify \
FHIR resources, run terminology and CQL operations, and inspect server totals. The target server \
can be switched at runtime with set_blaze_url.";

/// MCP server initialization result
#[derive(Debug, Clone)]
pub struct ServerInitResult {
    pub protocol_version: String,
    pub server_name: String,
    pub server_version: String,
    pub instructions: String,
}

/// Tool definition as listed to clients
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Main MCP server bridging protocol messages to the Blaze backend
#[derive(Debug, Clone)]
pub struct McpServer {
    config: ServerConfig,
    dispatcher: ToolDispatcher,
    resources: ResourceProvider,
}

impl McpServer {
    /// Create a server from validated configuration
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(SessionState::new(config.initial_target()?));
        let client = FhirClient::new(session)?;
        Ok(Self::with_client(config, client))
    }

    /// Create a server around an existing backend client
    pub fn with_client(config: ServerConfig, client: FhirClient) -> Self {
        let dispatcher = ToolDispatcher::new(client.clone(), config.page_limits(), config.admin_tools_enabled);
        Self {
            config,
            dispatcher,
            resources: ResourceProvider::new(client),
        }
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn resources(&self) -> &ResourceProvider {
        &self.resources
    }

    /// Get MCP initialize result for the requested protocol revision
    pub fn get_initialize_result(&self, requested: Option<&str>) -> ServerInitResult {
        let protocol_version = requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        ServerInitResult {
            protocol_version: protocol_version.to_string(),
            server_name: SERVER_NAME.to_string(),
            server_version: crate::VERSION.to_string(),
            instructions: INSTRUCTIONS.to_string(),
        }
    }

    /// Get available tools list
    pub fn get_tools(&self) -> Vec<ToolDefinition> {
        self.dispatcher
            .tools()
            .map(|spec| ToolDefinition {
                name: spec.name.to_string(),
                description: spec.description.to_string(),
                input_schema: spec.input_schema(),
            })
            .collect()
    }

    fn initialize_response(&self, requested: Option<&str>) -> Value {
        let init = self.get_initialize_result(requested);
        json!({
            "protocolVersion": init.protocol_version,
            "serverInfo": {
                "name": init.server_name,
                "version": init.server_version
            },
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
                "prompts": {"listChanged": false}
            },
            "instructions": init.instructions
        })
    }

    fn tools_response(&self) -> Value {
        let tools: Vec<Value> = self
            .get_tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema
                })
            })
            .collect();
        json!({ "tools": tools })
    }
}

#[async_trait]
impl MessageHandler for McpServer {
    #[instrument(skip_all)]
    async fn handle_message(&self, message: McpMessage) -> Result<Option<McpMessage>> {
        let reply = match message {
            McpMessage::Initialize { id, params } => {
                let client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str());
                info!("Received initialize request from client: {}", client);
                let result = self.initialize_response(params.protocol_version.as_deref());
                McpMessage::result(id, result)
            }

            McpMessage::Ping { id } => McpMessage::result(id, json!({})),

            McpMessage::ToolsList { id } => {
                debug!("Received tools list request");
                McpMessage::result(id, self.tools_response())
            }

            McpMessage::ToolsCall { id, params } => {
                info!("Received tool call: {}", params.name);
                let arguments = params.arguments.unwrap_or(Value::Null);
                let result = self.dispatcher.call(&params.name, arguments).await;
                McpMessage::result(id, result.to_json())
            }

            McpMessage::ResourcesList { id } => {
                let resources = serde_json::to_value(self.resources.list())?;
                McpMessage::result(id, json!({ "resources": resources }))
            }

            McpMessage::ResourcesRead { id, params } => {
                debug!("Reading resource {}", params.uri);
                match self.resources.read(&params.uri).await {
                    Ok(contents) => McpMessage::result(id, json!({ "contents": [contents] })),
                    Err(e) => {
                        warn!("Resource read failed for {}: {}", params.uri, e);
                        McpMessage::error(Some(id), McpError::from(&e))
                    }
                }
            }

            McpMessage::PromptsList { id } => {
                let prompts = serde_json::to_value(PROMPTS)?;
                McpMessage::result(id, json!({ "prompts": prompts }))
            }

            McpMessage::PromptsGet { id, params } => match prompts::render(&params.name, params.arguments.as_ref()) {
                Ok(prompt) => McpMessage::result(id, prompt.to_json()),
                Err(e) => McpMessage::error(Some(id), McpError::from(&e)),
            },

            McpMessage::Unsupported { id, method } => {
                debug!("Unsupported method: {}", method);
                McpMessage::error(
                    Some(id),
                    McpError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
                )
            }

            McpMessage::InvalidParams { id, method, message } => McpMessage::error(
                Some(id),
                McpError::new(INVALID_PARAMS, format!("Invalid params for {method}: {message}")),
            ),

            McpMessage::Notification { method, .. } => {
                debug!("Received notification: {}", method);
                return Ok(None);
            }

            McpMessage::Response { .. } => {
                warn!("Received unexpected response message");
                return Ok(None);
            }
        };
        Ok(Some(reply))
    }

    async fn health(&self) -> Value {
        let target = self.dispatcher.client().session().get_target().await;
        json!({
            "status": "healthy",
            "version": crate::VERSION,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "blaze_url": target.display_url(),
            "admin_tools_enabled": self.dispatcher.admin_tools_enabled()
        })
    }
}
