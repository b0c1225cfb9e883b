#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header::ACCEPT},
    response::{IntoResponse, Response},
};
use blaze_mcp::{McpServer, ServerConfig};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One request as the fake backend saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub accept: Option<String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_values(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct Canned {
    status: StatusCode,
    body: Option<Value>,
    delay: Duration,
}

#[derive(Default)]
struct FakeState {
    requests: Mutex<Vec<RecordedRequest>>,
    routes: Mutex<HashMap<(Method, String), Canned>>,
}

/// In-process stand-in for a Blaze server.
///
/// Answers configured `(method, path)` pairs with canned JSON and records
/// everything it receives. Unconfigured paths get a 404 OperationOutcome.
pub struct FakeBlaze {
    addr: SocketAddr,
    state: Arc<FakeState>,
    server: JoinHandle<()>,
}

impl FakeBlaze {
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        let app = Router::new()
            .fallback(handle_request)
            .with_state(Arc::clone(&state));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state, server }
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL under the usual `/fhir` prefix
    pub fn base_url(&self) -> String {
        self.url("/fhir")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.origin(), path)
    }

    pub fn on(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.insert(method, path, status, Some(body), Duration::ZERO)
    }

    pub fn on_empty(&self, method: Method, path: &str, status: u16) -> &Self {
        self.insert(method, path, status, None, Duration::ZERO)
    }

    pub fn on_slow(&self, method: Method, path: &str, delay: Duration, body: Value) -> &Self {
        self.insert(method, path, 200, Some(body), delay)
    }

    fn insert(&self, method: Method, path: &str, status: u16, body: Option<Value>, delay: Duration) -> &Self {
        let canned = Canned {
            status: StatusCode::from_u16(status).unwrap(),
            body,
            delay,
        };
        self.state
            .routes
            .lock()
            .unwrap()
            .insert((method, path.to_string()), canned);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> RecordedRequest {
        self.requests().pop().expect("the backend saw no request")
    }
}

impl Drop for FakeBlaze {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn handle_request(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let parsed = reqwest::Url::parse(&format!("http://fake{uri}")).unwrap();
    let query = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let path = uri.path().to_string();

    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        query,
        accept: headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).ok(),
    });

    let canned = state.routes.lock().unwrap().get(&(method, path.clone())).cloned();
    let Some(canned) = canned else {
        return (StatusCode::NOT_FOUND, Json(operation_outcome("not-found", &format!("no route for {path}"))))
            .into_response();
    };
    if !canned.delay.is_zero() {
        tokio::time::sleep(canned.delay).await;
    }
    match canned.body {
        Some(body) => (canned.status, [("content-type", "application/fhir+json")], Json(body)).into_response(),
        None => canned.status.into_response(),
    }
}

/// A URL nothing listens on
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/fhir")
}

pub fn operation_outcome(code: &str, diagnostics: &str) -> Value {
    json!({
        "resourceType": "OperationOutcome",
        "issue": [{
            "severity": "error",
            "code": code,
            "diagnostics": diagnostics
        }]
    })
}

pub fn config_for(base_url: &str) -> ServerConfig {
    ServerConfig {
        blaze_base_url: base_url.to_string(),
        blaze_timeout: 5.0,
        ..Default::default()
    }
}

pub fn server_for(base_url: &str) -> McpServer {
    McpServer::new(config_for(base_url)).unwrap()
}

/// Run a tool and return the `tools/call` result body
pub async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> Value {
    server.dispatcher().call(name, arguments).await.to_json()
}

/// Test utilities for building FHIR payloads
pub mod test_utils {
    use super::*;

    pub fn patient(id: &str) -> Value {
        json!({
            "resourceType": "Patient",
            "id": id,
            "meta": {"versionId": "1"},
            "name": [{"use": "official", "family": "Doe", "given": ["John"]}],
            "gender": "male",
            "birthDate": "1980-01-01"
        })
    }

    pub fn observation(id: &str, patient: &str) -> Value {
        json!({
            "resourceType": "Observation",
            "id": id,
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": "8310-5"}]},
            "subject": {"reference": format!("Patient/{patient}")}
        })
    }

    pub fn searchset(total: Option<u64>, resources: Vec<Value>, next: Option<String>) -> Value {
        let mut bundle = json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": resources.into_iter().map(|r| json!({"resource": r})).collect::<Vec<_>>(),
            "link": [{"relation": "self", "url": "http://ignored/fhir"}]
        });
        if let Some(total) = total {
            bundle["total"] = json!(total);
        }
        if let Some(next) = next {
            bundle["link"]
                .as_array_mut()
                .unwrap()
                .push(json!({"relation": "next", "url": next}));
        }
        bundle
    }

    pub fn capability_statement() -> Value {
        json!({
            "resourceType": "CapabilityStatement",
            "status": "active",
            "kind": "instance",
            "fhirVersion": "4.0.1",
            "software": {"name": "Blaze", "version": "0.30.0"},
            "rest": [{
                "mode": "server",
                "resource": [
                    {"type": "Patient"},
                    {"type": "Observation"},
                    {"type": "Condition"},
                    {"type": "Patient"}
                ]
            }]
        })
    }

    pub fn totals(counts: &[(&str, u64)]) -> Value {
        json!({
            "resourceType": "Parameters",
            "parameter": counts
                .iter()
                .map(|(name, count)| json!({"name": name, "valueUnsignedInt": count}))
                .collect::<Vec<_>>()
        })
    }
}

/// Test assertions and validation helpers
pub mod assertions {
    use super::*;

    /// Assert a successful `tools/call` result and return its structured content
    pub fn assert_tool_success(result: &Value) -> &Value {
        assert_eq!(result["isError"], false, "expected success, got {result:#}");
        &result["structuredContent"]
    }

    /// Assert a failed `tools/call` result of the given error kind
    pub fn assert_tool_error<'a>(result: &'a Value, kind: &str) -> &'a Value {
        assert_eq!(result["isError"], true, "expected failure, got {result:#}");
        assert_eq!(result["structuredContent"]["kind"], kind, "{result:#}");
        &result["structuredContent"]
    }

    pub fn tool_text(result: &Value) -> &str {
        result["content"][0]["text"].as_str().unwrap_or_default()
    }
}
