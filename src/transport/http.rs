//! HTTP/SSE transport implementation
//!
//! Implements the MCP SSE transport: a client opens `GET /sse`, receives an
//! `endpoint` event naming its message URL, and posts JSON-RPC messages to
//! `POST /messages?session_id=...`. Replies are pushed on the event stream.
//!
//! A few plain HTTP routes are served alongside for scripting and probes:
//! `POST /mcp` answers a JSON-RPC request directly, `GET /mcp/tools/list`,
//! `POST /mcp/tools/{tool_name}` and `GET /health`.

use anyhow::{Context, Result};
use async_stream::stream;
use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::{
    net::TcpListener,
    sync::{RwLock, broadcast, watch},
    task::AbortHandle,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    CancelledParams, McpMessage, MessageHandler, RequestId, ToolsCallParams, dispatch, parse_message,
};

/// Event pushed to one SSE client
#[derive(Debug, Clone)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

type InFlight = Arc<Mutex<HashMap<RequestId, AbortHandle>>>;

/// One open `GET /sse` stream
#[derive(Clone)]
struct SseSession {
    sender: broadcast::Sender<SseMessage>,
    in_flight: InFlight,
}

impl SseSession {
    fn push(&self, message: &McpMessage) {
        let data = message.to_jsonrpc().to_json_value().to_string();
        if self
            .sender
            .send(SseMessage {
                event: "message".to_string(),
                data,
            })
            .is_err()
        {
            debug!("SSE client went away before the reply was sent");
        }
    }

    fn abort_all(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in in_flight.drain() {
            handle.abort();
        }
    }
}

type Sessions = Arc<RwLock<HashMap<String, SseSession>>>;

/// HTTP transport for web applications and remote access
#[derive(Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
    sessions: Sessions,
    shutdown: watch::Sender<bool>,
}

/// Application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<dyn MessageHandler>,
    pub transport: HttpTransport,
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

/// Body of `POST /mcp/tools/{tool_name}`
#[derive(Debug, Default, Deserialize)]
pub struct McpToolRequest {
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Removes the session when its event stream is dropped
struct SessionGuard {
    session_id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let sessions = Arc::clone(&self.sessions);
        let session_id = std::mem::take(&mut self.session_id);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(session) = sessions.write().await.remove(&session_id) {
                    session.abort_all();
                    info!("SSE client {} disconnected", session_id);
                }
            });
        }
    }
}

impl HttpTransport {
    /// Create a new HTTP transport instance
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: watch::channel(false).0,
        }
    }

    /// Create the Axum router with all routes and middleware
    pub fn router(&self, handler: Arc<dyn MessageHandler>) -> Router {
        let app_state = AppState {
            handler,
            transport: self.clone(),
        };

        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .allow_origin(Any);

        Router::new()
            .route("/sse", get(handle_sse_connection))
            .route("/messages", post(handle_session_message))
            .route("/mcp", post(handle_direct_message))
            .route("/mcp/tools/list", get(handle_tools_list))
            .route("/mcp/tools/{tool_name}", post(handle_tool_call))
            .route("/health", get(handle_health_check))
            .layer(cors)
            .with_state(app_state)
    }

    /// Number of open SSE sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new("0.0.0.0", 8000)
    }
}

#[async_trait]
impl super::Transport for HttpTransport {
    /// Start the HTTP transport server
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let app = self.router(handler);
        let addr = format!("{}:{}", self.host, self.port);

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
        info!("HTTP server listening on http://{}", addr);

        let mut shutdown = self.shutdown.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context("HTTP server error")?;

        Ok(())
    }

    /// Shutdown the HTTP transport
    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down HTTP transport");
        self.shutdown.send_replace(true);
        for (_, session) in self.sessions.write().await.drain() {
            session.abort_all();
        }
        debug!("HTTP transport shutdown completed");
        Ok(())
    }

    /// Broadcast a server-initiated message to every SSE client
    async fn send_message(&self, message: McpMessage) -> Result<()> {
        debug!("Broadcasting message via HTTP transport SSE");
        for session in self.sessions.read().await.values() {
            session.push(&message);
        }
        Ok(())
    }
}

/// Open an SSE stream and announce the session's message endpoint
async fn handle_sse_connection(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = Uuid::new_v4().simple().to_string();
    let (sender, mut receiver) = broadcast::channel(100);
    state.transport.sessions.write().await.insert(
        session_id.clone(),
        SseSession {
            sender,
            in_flight: Arc::default(),
        },
    );
    info!("Establishing SSE connection for client: {}", session_id);

    let guard = SessionGuard {
        session_id: session_id.clone(),
        sessions: Arc::clone(&state.transport.sessions),
    };
    let endpoint = format!("/messages?session_id={session_id}");

    let stream = stream! {
        let _guard = guard;
        yield Ok::<Event, Infallible>(Event::default().event("endpoint").data(endpoint));

        loop {
            match receiver.recv().await {
                Ok(message) => yield Ok(Event::default().event(message.event).data(message.data)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("SSE client {} lagged behind, {} messages dropped", session_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Accept a JSON-RPC message for an open SSE session
async fn handle_session_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    body: String,
) -> Response {
    let Some(session) = state.transport.sessions.read().await.get(&query.session_id).cloned() else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown session '{}'", query.session_id)})),
        )
            .into_response();
    };

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(reply) => {
            warn!("Rejected malformed SSE message from {}", query.session_id);
            return (StatusCode::BAD_REQUEST, Json(reply.to_jsonrpc().to_json_value())).into_response();
        }
    };

    match message {
        McpMessage::Notification { ref method, ref params } if method == "notifications/cancelled" => {
            let cancelled = params
                .clone()
                .and_then(|p| serde_json::from_value::<CancelledParams>(p).ok());
            if let Some(cancelled) = cancelled {
                let handle = session
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&cancelled.request_id);
                if let Some(handle) = handle {
                    info!(request_id = %cancelled.request_id, "Cancelling in-flight request");
                    handle.abort();
                }
            }
        }
        message @ (McpMessage::Notification { .. } | McpMessage::Response { .. }) => {
            if let Some(reply) = dispatch(state.handler.as_ref(), message).await {
                session.push(&reply);
            }
        }
        message => {
            let Some(id) = message.request_id().cloned() else {
                return StatusCode::ACCEPTED.into_response();
            };
            let handler = Arc::clone(&state.handler);
            let task_session = session.clone();
            let task_id = id.clone();

            // Holding the lock across spawn keeps the task from finishing
            // before its handle is registered.
            let mut in_flight = session.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let task = tokio::spawn(async move {
                let reply = dispatch(handler.as_ref(), message).await;
                task_session
                    .in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&task_id);
                if let Some(reply) = reply {
                    task_session.push(&reply);
                }
            });
            in_flight.insert(id, task.abort_handle());
        }
    }

    StatusCode::ACCEPTED.into_response()
}

/// Answer one JSON-RPC message in the HTTP response
async fn handle_direct_message(State(state): State<AppState>, body: String) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(reply) => {
            return (StatusCode::BAD_REQUEST, Json(reply.to_jsonrpc().to_json_value())).into_response();
        }
    };
    match dispatch(state.handler.as_ref(), message).await {
        Some(reply) => (StatusCode::OK, Json(reply.to_jsonrpc().to_json_value())).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn http_request_id() -> RequestId {
    RequestId::String(format!("http-{}", Uuid::new_v4().simple()))
}

/// Unwrap a handler reply into an HTTP response
fn reply_to_response(reply: Option<McpMessage>) -> Response {
    match reply {
        Some(McpMessage::Response {
            result: Some(result), ..
        }) => (StatusCode::OK, Json(result)).into_response(),
        Some(McpMessage::Response {
            error: Some(error), ..
        }) => {
            let status = match error.code {
                super::METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
                super::INVALID_PARAMS => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"error": error}))).into_response()
        }
        _ => {
            error!("Handler produced no response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "No response generated"})),
            )
                .into_response()
        }
    }
}

/// Handle MCP tools list request
async fn handle_tools_list(State(state): State<AppState>) -> Response {
    debug!("HTTP tools list request");
    let message = McpMessage::ToolsList { id: http_request_id() };
    reply_to_response(dispatch(state.handler.as_ref(), message).await)
}

/// Handle MCP tool calls via HTTP POST
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    body: String,
) -> Response {
    debug!("HTTP tool call: {}", tool_name);

    let request = if body.trim().is_empty() {
        McpToolRequest::default()
    } else {
        match serde_json::from_str::<McpToolRequest>(&body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("invalid request body: {e}")})),
                )
                    .into_response();
            }
        }
    };

    let message = McpMessage::ToolsCall {
        id: http_request_id(),
        params: ToolsCallParams {
            name: tool_name,
            arguments: request.arguments,
        },
    };
    reply_to_response(dispatch(state.handler.as_ref(), message).await)
}

/// Health check endpoint
async fn handle_health_check(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.handler.health().await)).into_response()
}
