//! Administrative operations
//!
//! `get_totals` is read-only and always available. Compaction and
//! re-indexing are gated by `admin_tools_enabled`; the dispatcher refuses
//! them before any of the code here runs.

use reqwest::Method;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::args::{self, Validate};
use super::{ToolContext, ToolOutput, bundle, expect_success, follow_pages};
use crate::client::{BackendRequest, FhirClient};
use crate::error::Result;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CompactionArgs {
    /// Column family to compact; all when omitted
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub column_family: Option<String>,
}

impl Validate for CompactionArgs {}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ReindexArgs {
    /// Resource type to re-index; all types when omitted
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub resource_type: Option<String>,
    /// Search parameter URL to re-index
    #[serde(default, deserialize_with = "args::lenient_opt_string")]
    pub search_param: Option<String>,
}

impl Validate for ReindexArgs {
    fn validate(&self, operation: &str) -> Result<()> {
        match &self.resource_type {
            Some(resource_type) => args::check_resource_type(operation, "resource_type", resource_type),
            None => Ok(()),
        }
    }
}

/// Per-type resource counts from `GET /$totals`.
///
/// A paged Bundle answer is counted across all of its pages.
pub async fn fetch_totals(client: &FhirClient) -> Result<BTreeMap<String, u64>> {
    let body = expect_success(client.call(BackendRequest::get(["$totals"])).await?)?;
    if body.get("resourceType").and_then(Value::as_str) == Some("Bundle") {
        let pages = follow_pages(client, body).await?;
        return Ok(bundle::count_by_resource_type(&pages));
    }
    Ok(bundle::totals(&body))
}

/// `{"total": n, "totals": {type: count}}`
pub fn totals_json(totals: &BTreeMap<String, u64>) -> Value {
    json!({
        "total": totals.values().sum::<u64>(),
        "totals": bundle::counts_to_json(totals),
    })
}

pub async fn get_totals(ctx: &ToolContext) -> Result<ToolOutput> {
    let totals = fetch_totals(&ctx.client).await?;

    let mut summary = String::from("Resource totals:");
    for (resource_type, count) in &totals {
        summary.push_str(&format!("\n  {resource_type}: {count}"));
    }
    Ok(ToolOutput::with_summary(summary, totals_json(&totals)))
}

pub async fn run_compaction(ctx: &ToolContext, args: CompactionArgs) -> Result<ToolOutput> {
    let request = BackendRequest::new(Method::POST, ["$compact"])
        .query_opt("column-family", args.column_family.as_deref());
    let result = expect_success(ctx.client.call(request).await?)?;
    Ok(ToolOutput::with_summary("Compaction triggered", result))
}

pub async fn run_reindex(ctx: &ToolContext, args: ReindexArgs) -> Result<ToolOutput> {
    let request = BackendRequest::new(Method::POST, ["$re-index"])
        .query_opt("type", args.resource_type.as_deref())
        .query_opt("search-param", args.search_param.as_deref());
    let result = expect_success(ctx.client.call(request).await?)?;
    Ok(ToolOutput::with_summary("Re-index triggered", result))
}
