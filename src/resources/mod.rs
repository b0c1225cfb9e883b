//! MCP resources implementation
//!
//! Resources provide read-only views of the current Blaze server. Nothing is
//! cached: every read goes to the backend.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::{BackendRequest, FhirClient};
use crate::error::{Error, Result};
use crate::tools::{admin, expect_success};

pub const CAPABILITIES_URI: &str = "blaze://capabilities";
pub const RESOURCE_TYPES_URI: &str = "blaze://resource-types";
pub const TOTALS_URI: &str = "blaze://totals";

/// Entry in `resources/list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub mime_type: &'static str,
}

/// One item of a `resources/read` answer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

const RESOURCES: &[ResourceDescriptor] = &[
    ResourceDescriptor {
        uri: CAPABILITIES_URI,
        name: "Server Capabilities",
        description: "FHIR CapabilityStatement of the Blaze server",
        mime_type: "application/fhir+json",
    },
    ResourceDescriptor {
        uri: RESOURCE_TYPES_URI,
        name: "Resource Types",
        description: "Resource types supported by the Blaze server",
        mime_type: "application/json",
    },
    ResourceDescriptor {
        uri: TOTALS_URI,
        name: "Resource Totals",
        description: "Resource counts by type",
        mime_type: "application/json",
    },
];

/// Serves the `blaze://` resources
#[derive(Debug, Clone)]
pub struct ResourceProvider {
    client: FhirClient,
}

impl ResourceProvider {
    pub fn new(client: FhirClient) -> Self {
        Self { client }
    }

    pub fn list(&self) -> &'static [ResourceDescriptor] {
        RESOURCES
    }

    pub async fn read(&self, uri: &str) -> Result<ResourceContents> {
        let descriptor = RESOURCES
            .iter()
            .find(|r| r.uri == uri)
            .ok_or_else(|| Error::UnknownOperation(uri.to_string()))?;
        debug!(uri, "Reading resource");

        let value = match descriptor.uri {
            CAPABILITIES_URI => self.capabilities().await?,
            RESOURCE_TYPES_URI => json!({ "resourceTypes": resource_types(&self.capabilities().await?) }),
            _ => admin::totals_json(&admin::fetch_totals(&self.client).await?),
        };

        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: descriptor.mime_type.to_string(),
            text: serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
        })
    }

    async fn capabilities(&self) -> Result<Value> {
        expect_success(self.client.call(BackendRequest::get(["metadata"])).await?)
    }
}

/// Sorted, de-duplicated type names declared in `rest[*].resource[*].type`
pub fn resource_types(capabilities: &Value) -> Vec<String> {
    let mut types: Vec<String> = capabilities
        .get("rest")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|rest| rest.get("resource").and_then(Value::as_array))
        .flatten()
        .filter_map(|resource| resource.get("type").and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();
    types
}
