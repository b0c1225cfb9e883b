//! End-to-end protocol tests over the stdio and HTTP transports

use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use blaze_mcp::transport::{Transport, http::HttpTransport, stdio::StdioTransport};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, duplex};
use tower::ServiceExt;

mod common;

use common::{FakeBlaze, server_for, test_utils};

struct StdioSession {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    running: tokio::task::JoinHandle<anyhow::Result<()>>,
}

impl StdioSession {
    fn start(base_url: &str) -> Self {
        let (input, server_in) = duplex(256 * 1024);
        let (server_out, client_out) = duplex(256 * 1024);
        let transport = StdioTransport::with_io(server_in, server_out);
        let server = Arc::new(server_for(base_url));
        let running = tokio::spawn(async move { transport.start(server).await });
        Self {
            input,
            output: BufReader::new(client_out).lines(),
            running,
        }
    }

    async fn send(&mut self, message: Value) {
        let mut line = message.to_string();
        line.push('\n');
        self.input.write_all(line.as_bytes()).await.unwrap();
    }

    async fn send_raw(&mut self, raw: &str) {
        self.input.write_all(raw.as_bytes()).await.unwrap();
    }

    async fn receive(&mut self) -> Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.output.next_line())
            .await
            .expect("reply in time")
            .unwrap()
            .expect("a reply line");
        serde_json::from_str(&line).unwrap()
    }

    async fn request(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        let reply = self.receive().await;
        assert_eq!(reply["id"], id, "{reply:#}");
        reply
    }

    async fn close(self) {
        drop(self.input);
        tokio::time::timeout(Duration::from_secs(10), self.running)
            .await
            .expect("transport stops on EOF")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn test_stdio_session_lifecycle() {
    let blaze = FakeBlaze::start().await;
    blaze.on(Method::GET, "/fhir/Patient/p1", 200, test_utils::patient("p1"));
    let mut session = StdioSession::start(&blaze.base_url());

    let init = session
        .request(
            1,
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "integration", "version": "1.0"}
            }),
        )
        .await;
    assert_eq!(init["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(init["result"]["serverInfo"]["name"], "blaze-mcp");

    session
        .send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;

    let tools = session.request(2, "tools/list", json!({})).await;
    assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), 22);

    let call = session
        .request(
            3,
            "tools/call",
            json!({"name": "read_resource", "arguments": {"resource_type": "Patient", "resource_id": "p1"}}),
        )
        .await;
    assert_eq!(call["result"]["isError"], false);
    assert_eq!(call["result"]["structuredContent"]["id"], "p1");

    let failed = session
        .request(4, "tools/call", json!({"name": "no_such_tool", "arguments": {}}))
        .await;
    assert_eq!(failed["result"]["isError"], true);
    assert_eq!(failed["result"]["structuredContent"]["kind"], "unknown_operation");

    session.close().await;
}

#[tokio::test]
async fn test_stdio_protocol_errors() {
    let blaze = FakeBlaze::start().await;
    let mut session = StdioSession::start(&blaze.base_url());

    session.send_raw("this is not json\n").await;
    let reply = session.receive().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    let reply = session.request(5, "completion/complete", json!({})).await;
    assert_eq!(reply["error"]["code"], -32601);

    let reply = session.request(6, "resources/read", json!({})).await;
    assert_eq!(reply["error"]["code"], -32602);

    let reply = session
        .request(7, "prompts/get", json!({"name": "patient_summary", "arguments": {}}))
        .await;
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["error"]["data"]["kind"], "invalid_arguments");

    session.close().await;
}

#[tokio::test]
async fn test_stdio_string_ids_and_resources() {
    let blaze = FakeBlaze::start().await;
    blaze.on(Method::GET, "/fhir/metadata", 200, test_utils::capability_statement());
    let mut session = StdioSession::start(&blaze.base_url());

    session
        .send(json!({"jsonrpc": "2.0", "id": "caps", "method": "resources/read", "params": {"uri": "blaze://capabilities"}}))
        .await;
    let reply = session.receive().await;
    assert_eq!(reply["id"], "caps");
    let contents = &reply["result"]["contents"][0];
    assert_eq!(contents["uri"], "blaze://capabilities");
    assert_eq!(contents["mimeType"], "application/fhir+json");
    let statement: Value = serde_json::from_str(contents["text"].as_str().unwrap()).unwrap();
    assert_eq!(statement["software"]["name"], "Blaze");

    session.close().await;
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_routes_with_server() {
    let blaze = FakeBlaze::start().await;
    blaze.on(
        Method::GET,
        "/fhir/$totals",
        200,
        test_utils::totals(&[("Patient", 3)]),
    );
    let server = Arc::new(server_for(&blaze.base_url()));
    let router = HttpTransport::new("127.0.0.1", 0).router(server);

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp")
                .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["result"]["protocolVersion"], "2024-11-05");

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/mcp/tools/get_totals")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(response).await["structuredContent"]["total"], 3);

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/mcp/tools/list").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await["tools"].as_array().unwrap().len(), 22);

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["blaze_url"], blaze.base_url());
    assert!(health["timestamp"].is_string());
}
