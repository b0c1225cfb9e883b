//! HTTP client for the Blaze FHIR server
//!
//! [`FhirClient`] turns a [`BackendRequest`] into one HTTP call against the
//! session's current target. HTTP error statuses are handed back untouched in
//! the [`BackendResponse`]; only transport failures and timeouts become errors.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::{SessionState, Target};

pub const FHIR_JSON: &str = "application/fhir+json";
pub const PLAIN_JSON: &str = "application/json";

/// Media type requested from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accept {
    #[default]
    Fhir,
    /// Non-FHIR endpoints such as `$graphql`
    Json,
}

impl Accept {
    fn media_type(self) -> &'static str {
        match self {
            Accept::Fhir => FHIR_JSON,
            Accept::Json => PLAIN_JSON,
        }
    }
}

/// One outbound call, relative to the target base URL
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub accept: Accept,
}

impl BackendRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            body: None,
            accept: Accept::Fhir,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn post<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, segments)
    }

    /// Append a query parameter; repeated names are kept in order
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Append a query parameter only when a value is present
    pub fn query_opt<V: ToString>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }

    /// Human-readable `METHOD /path` used in logs
    pub fn describe(&self) -> String {
        format!("{} /{}", self.method, self.segments.join("/"))
    }
}

/// Response body as received
#[derive(Debug, Clone, PartialEq)]
pub enum BackendBody {
    Json(Value),
    Raw(Vec<u8>),
}

/// Status, content type and body of one backend answer
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    pub status: u16,
    pub content_type: String,
    pub body: BackendBody,
}

impl BackendResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// JSON body, if the backend sent one
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            BackendBody::Json(value) => Some(value),
            BackendBody::Raw(_) => None,
        }
    }

    /// Consume into a JSON value; empty bodies become `null`, other raw bodies a string
    pub fn into_json(self) -> Value {
        match self.body {
            BackendBody::Json(value) => value,
            BackendBody::Raw(bytes) if bytes.is_empty() => Value::Null,
            BackendBody::Raw(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    /// Body rendered as text
    pub fn text(&self) -> String {
        match &self.body {
            BackendBody::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            BackendBody::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// The body when it is a FHIR `OperationOutcome`
    pub fn operation_outcome(&self) -> Option<&Value> {
        self.json()
            .filter(|value| value.get("resourceType").and_then(Value::as_str) == Some("OperationOutcome"))
    }
}

/// Join path segments and query parameters onto a base URL.
///
/// The base path is kept as a prefix; each segment is percent-encoded as a
/// single path segment.
pub fn join_url(base: &Url, segments: &[String], query: &[(String, String)]) -> Result<Url> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| Error::invalid_target(base.as_str(), "URL cannot be used as a base"))?;
        path.pop_if_empty();
        path.extend(segments.iter().filter(|segment| !segment.is_empty()));
    }
    if !query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// Outbound HTTP client bound to the shared session
#[derive(Debug, Clone)]
pub struct FhirClient {
    http: reqwest::Client,
    session: Arc<SessionState>,
}

impl FhirClient {
    pub fn new(session: Arc<SessionState>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("blaze-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Unreachable {
                url: String::new(),
                cause: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_http_client(http, session))
    }

    pub fn with_http_client(http: reqwest::Client, session: Arc<SessionState>) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Call the backend using the session's current target
    pub async fn call(&self, request: BackendRequest) -> Result<BackendResponse> {
        let target = self.session.get_target().await;
        self.call_with_target(&target, request).await
    }

    /// Call the backend against an explicit target, leaving the session alone
    pub async fn call_with_target(
        &self,
        target: &Target,
        request: BackendRequest,
    ) -> Result<BackendResponse> {
        let url = join_url(target.base_url(), &request.segments, &request.query)?;
        self.execute(target, url, request.method, request.body, request.accept)
            .await
    }

    /// GET an absolute URL handed out by the backend, such as a paging link.
    ///
    /// Only URLs on the same origin as the current target are followed.
    pub async fn get_absolute(&self, url: &str) -> Result<BackendResponse> {
        let target = self.session.get_target().await;
        let url = Url::parse(url)
            .map_err(|e| Error::invalid_arguments("follow_link", format!("invalid link '{url}': {e}")))?;
        if url.origin() != target.base_url().origin() {
            return Err(Error::invalid_arguments(
                "follow_link",
                format!("link '{url}' points outside {}", target.display_url()),
            ));
        }
        self.execute(&target, url, Method::GET, None, Accept::Fhir).await
    }

    async fn execute(
        &self,
        target: &Target,
        url: Url,
        method: Method,
        body: Option<Value>,
        accept: Accept,
    ) -> Result<BackendResponse> {
        debug!(%method, %url, "Calling FHIR server");

        let mut builder = self
            .http
            .request(method, url.clone())
            .timeout(target.timeout())
            .header(ACCEPT, accept.media_type());
        if let Some(body) = &body {
            let bytes = serde_json::to_vec(body).map_err(|e| {
                Error::invalid_arguments("request_body", format!("body is not serializable: {e}"))
            })?;
            builder = builder.header(CONTENT_TYPE, PLAIN_JSON).body(bytes);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(target, &url, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(target, &url, e))?;

        debug!(status, bytes = bytes.len(), %url, "FHIR server responded");

        Ok(BackendResponse {
            status,
            body: decode_body(&content_type, bytes.to_vec()),
            content_type,
        })
    }
}

fn decode_body(content_type: &str, bytes: Vec<u8>) -> BackendBody {
    let looks_json = content_type.contains("json")
        || bytes.first().is_some_and(|b| matches!(b, b'{' | b'['));
    if looks_json && !bytes.is_empty() {
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return BackendBody::Json(value);
        }
    }
    BackendBody::Raw(bytes)
}

fn transport_error(target: &Target, url: &Url, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        warn!(%url, "FHIR request timed out");
        return Error::Timeout {
            url: url.to_string(),
            timeout: target.timeout(),
        };
    }

    let mut cause = error.to_string();
    let mut source = std::error::Error::source(&error);
    while let Some(inner) = source {
        cause.push_str(": ");
        cause.push_str(&inner.to_string());
        source = inner.source();
    }
    warn!(%url, %cause, "FHIR server unreachable");
    Error::Unreachable {
        url: url.to_string(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    fn segs(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_preserves_base_path_prefix() {
        let joined = join_url(&url("http://blaze:8080/fhir"), &segs(&["Patient", "123"]), &[]).unwrap();
        assert_eq!(joined.as_str(), "http://blaze:8080/fhir/Patient/123");
    }

    #[test]
    fn test_join_on_host_only_base() {
        let joined = join_url(&url("http://blaze:8080"), &segs(&["metadata"]), &[]).unwrap();
        assert_eq!(joined.as_str(), "http://blaze:8080/metadata");
    }

    #[test]
    fn test_join_without_segments_targets_base() {
        let joined = join_url(&url("http://blaze:8080/fhir"), &[], &[]).unwrap();
        assert_eq!(joined.as_str(), "http://blaze:8080/fhir");
    }

    #[test]
    fn test_join_keeps_operation_names_and_repeated_params() {
        let query = vec![
            ("code".to_string(), "8310-5".to_string()),
            ("code".to_string(), "8867-4".to_string()),
            ("name:exact".to_string(), "Doe".to_string()),
        ];
        let joined = join_url(
            &url("https://blaze.example.org/fhir"),
            &segs(&["Patient", "p1", "$everything"]),
            &query,
        )
        .unwrap();

        assert_eq!(joined.path(), "/fhir/Patient/p1/$everything");
        let pairs: Vec<(String, String)> = joined.query_pairs().into_owned().collect();
        assert_eq!(pairs, query);
    }

    #[test]
    fn test_join_encodes_segment_separators() {
        let joined = join_url(&url("http://blaze/fhir"), &segs(&["Patient", "a/b"]), &[]).unwrap();
        assert_eq!(joined.path(), "/fhir/Patient/a%2Fb");
    }

    #[test]
    fn test_decode_body_variants() {
        assert_eq!(
            decode_body(FHIR_JSON, br#"{"resourceType":"Patient"}"#.to_vec()),
            BackendBody::Json(json!({"resourceType": "Patient"}))
        );
        assert_eq!(decode_body("text/plain", b"boom".to_vec()), BackendBody::Raw(b"boom".to_vec()));
        assert_eq!(decode_body(FHIR_JSON, Vec::new()), BackendBody::Raw(Vec::new()));
        assert_eq!(decode_body(PLAIN_JSON, b"{broken".to_vec()), BackendBody::Raw(b"{broken".to_vec()));
    }

    #[test]
    fn test_operation_outcome_detection() {
        let response = BackendResponse {
            status: 400,
            content_type: FHIR_JSON.to_string(),
            body: BackendBody::Json(json!({"resourceType": "OperationOutcome", "issue": []})),
        };
        assert!(response.operation_outcome().is_some());
        assert!(!response.is_success());

        let response = BackendResponse {
            status: 200,
            content_type: FHIR_JSON.to_string(),
            body: BackendBody::Json(json!({"resourceType": "Patient"})),
        };
        assert!(response.operation_outcome().is_none());
        assert!(response.is_success());
    }

    #[test]
    fn test_builder_collects_optional_query() {
        let request = BackendRequest::get(["CodeSystem", "$lookup"])
            .query("system", "http://loinc.org")
            .query_opt("display", None::<String>)
            .query_opt("code", Some("8310-5"));

        assert_eq!(request.describe(), "GET /CodeSystem/$lookup");
        assert_eq!(
            request.query,
            vec![
                ("system".to_string(), "http://loinc.org".to_string()),
                ("code".to_string(), "8310-5".to_string()),
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_join_never_drops_prefix_or_doubles_slashes(
            host in "[a-z]{1,12}",
            prefix in proptest::collection::vec("[a-z0-9]{1,8}", 0..3),
            trailing in any::<bool>(),
            segments in proptest::collection::vec("[A-Za-z0-9][A-Za-z0-9.-]{0,15}", 0..4),
        ) {
            let mut raw = format!("http://{host}:8080");
            for part in &prefix {
                raw.push('/');
                raw.push_str(part);
            }
            if trailing {
                raw.push('/');
            }
            let base = Url::parse(&raw).unwrap();
            let joined = join_url(&base, &segments, &[]).unwrap();

            let expected: Vec<&str> = prefix.iter().chain(segments.iter()).map(String::as_str).collect();
            let actual: Vec<&str> = joined.path_segments().unwrap().filter(|s| !s.is_empty()).collect();
            prop_assert_eq!(actual, expected);
            prop_assert!(!joined.path().contains("//"));
            prop_assert_eq!(joined.host_str(), Some(host.as_str()));
        }
    }
}
